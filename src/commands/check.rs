use anyhow::Result;
use std::path::Path;

use crate::whitelist::Whitelist;

use super::utils::load_effective_config;

/// Check each URL against the configured whitelist
///
/// Returns whether every URL was allowed.
pub fn check_urls(config_path: Option<&Path>, urls: &[String]) -> Result<bool> {
    let config = load_effective_config(config_path)?;
    let whitelist = config.whitelist()?;

    let mut all_allowed = true;
    for (url, allowed) in evaluate(&whitelist, urls) {
        if allowed {
            println!("✓ allowed  {}", url);
        } else {
            println!("✗ blocked  {}", url);
            all_allowed = false;
        }
    }

    Ok(all_allowed)
}

fn evaluate<'a>(whitelist: &Whitelist, urls: &'a [String]) -> Vec<(&'a str, bool)> {
    urls.iter()
        .map(|url| (url.as_str(), whitelist.is_allowed(url)))
        .collect()
}
