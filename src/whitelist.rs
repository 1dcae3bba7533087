use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Placeholder page every surface starts on
pub const BLANK_PAGE: &str = "about:blank";

/// Product identifier that marks the controller's own bundled resources
pub const BUNDLE_MARKER: &str = "lockdown-browser";

/// Host the bundle is served from under `tauri://`
const APP_PROTOCOL_HOST: &str = "localhost";

/// Host the bundle is served from when the webview maps the app protocol to http(s)
const LOCAL_BUNDLE_HOST: &str = "tauri.localhost";

/// A single allowed navigation target
///
/// Written in configuration as `scheme://host` or `scheme://*.host`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct WhitelistEntry {
    pub scheme: String,
    pub host_pattern: String,
    pub wildcard_subdomain: bool,
}

impl WhitelistEntry {
    /// Parse an entry from its `scheme://[*.]host` form
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        let (scheme, rest) = trimmed
            .split_once("://")
            .with_context(|| format!("Whitelist entry '{}' is missing a scheme", pattern))?;

        let scheme = scheme.to_ascii_lowercase();
        if scheme != "https" {
            anyhow::bail!(
                "Whitelist entry '{}' must use https (got '{}')",
                pattern,
                scheme
            );
        }

        let authority = rest.split('/').next().unwrap_or_default();
        let (wildcard_subdomain, host) = match authority.strip_prefix("*.") {
            Some(suffix) => (true, suffix),
            None => (false, authority),
        };

        if host.is_empty() {
            anyhow::bail!("Whitelist entry '{}' has an empty host", pattern);
        }
        if host.contains('*') {
            anyhow::bail!(
                "Whitelist entry '{}' may only use a leading '*.' wildcard",
                pattern
            );
        }

        // Let the URL parser normalize case and IDNA so comparisons see the same form
        let reference = Url::parse(&format!("{}://{}", scheme, host))
            .with_context(|| format!("Whitelist entry '{}' is not a valid URL", pattern))?;
        let host_pattern = reference
            .host_str()
            .filter(|h| !h.is_empty())
            .with_context(|| format!("Whitelist entry '{}' has no host", pattern))?
            .to_string();

        Ok(Self {
            scheme,
            host_pattern,
            wildcard_subdomain,
        })
    }

    /// Check whether a parsed URL falls under this entry
    pub fn matches(&self, url: &Url) -> bool {
        if url.scheme() != self.scheme {
            return false;
        }

        let Some(host) = url.host_str() else {
            return false;
        };

        if self.wildcard_subdomain {
            host == self.host_pattern
                || host
                    .strip_suffix(self.host_pattern.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        } else {
            host == self.host_pattern
        }
    }
}

impl fmt::Display for WhitelistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard_subdomain {
            write!(f, "{}://*.{}", self.scheme, self.host_pattern)
        } else {
            write!(f, "{}://{}", self.scheme, self.host_pattern)
        }
    }
}

impl TryFrom<String> for WhitelistEntry {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WhitelistEntry> for String {
    fn from(entry: WhitelistEntry) -> Self {
        entry.to_string()
    }
}

/// Ordered set of allowed destinations
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Whitelist {
    entries: Vec<WhitelistEntry>,
}

impl Whitelist {
    pub fn new(entries: Vec<WhitelistEntry>) -> Self {
        Self { entries }
    }

    /// Build a whitelist from `scheme://[*.]host` patterns
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let entries = patterns
            .iter()
            .map(|p| WhitelistEntry::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[WhitelistEntry] {
        &self.entries
    }

    /// Entries in their configuration form, in declaration order
    pub fn patterns(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Decide whether a navigation target is allowed
    ///
    /// Total and fail-closed: anything that does not parse as a URL is denied.
    pub fn is_allowed(&self, url: &str) -> bool {
        if url == BLANK_PAGE {
            return true;
        }

        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        if is_blank_page(&parsed) || is_local_bundle(&parsed) {
            return true;
        }

        self.entries.iter().any(|entry| entry.matches(&parsed))
    }
}

fn is_blank_page(url: &Url) -> bool {
    url.scheme() == "about" && url.path() == "blank"
}

/// The controller's own UI bundle, loaded from a local scheme
fn is_local_bundle(url: &Url) -> bool {
    match url.scheme() {
        "tauri" => url.host_str() == Some(APP_PROTOCOL_HOST),
        "file" => url.path().contains(BUNDLE_MARKER),
        "http" | "https" => url.host_str() == Some(LOCAL_BUNDLE_HOST),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn khan_whitelist() -> Whitelist {
        Whitelist::from_patterns(&["https://www.khanacademy.org", "https://*.khanacademy.org"])
            .unwrap()
    }

    #[test]
    fn parses_exact_entry() {
        let entry = WhitelistEntry::parse("https://www.ixl.com").unwrap();
        assert_eq!(entry.scheme, "https");
        assert_eq!(entry.host_pattern, "www.ixl.com");
        assert!(!entry.wildcard_subdomain);
    }

    #[test]
    fn parses_wildcard_entry_and_normalizes_case() {
        let entry = WhitelistEntry::parse("HTTPS://*.IXL.com/").unwrap();
        assert_eq!(entry.host_pattern, "ixl.com");
        assert!(entry.wildcard_subdomain);
        assert_eq!(entry.to_string(), "https://*.ixl.com");
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(WhitelistEntry::parse("www.ixl.com").is_err());
        assert!(WhitelistEntry::parse("http://www.ixl.com").is_err());
        assert!(WhitelistEntry::parse("https://").is_err());
        assert!(WhitelistEntry::parse("https://*.").is_err());
        assert!(WhitelistEntry::parse("https://www.*.com").is_err());
    }

    #[test]
    fn wildcard_matches_apex_and_subdomains_only_on_dot_boundary() {
        for pattern in ["khanacademy.org", "ixl.com"] {
            let list = Whitelist::from_patterns(&[format!("https://*.{}", pattern)]).unwrap();
            assert!(list.is_allowed(&format!("https://{}", pattern)));
            assert!(list.is_allowed(&format!("https://x.{}", pattern)));
            assert!(list.is_allowed(&format!("https://a.b.{}/path?q=1", pattern)));
            assert!(!list.is_allowed(&format!("https://evil{}", pattern)));
            assert!(!list.is_allowed(&format!("https://{}.evil.net", pattern)));
        }
    }

    #[test]
    fn exact_entry_requires_exact_host() {
        let list = Whitelist::from_patterns(&["https://www.google.com"]).unwrap();
        assert!(list.is_allowed("https://www.google.com/search?q=rust"));
        assert!(!list.is_allowed("https://google.com"));
        assert!(!list.is_allowed("https://mail.google.com"));
    }

    #[test]
    fn khan_academy_scenario() {
        let list = khan_whitelist();
        assert!(list.is_allowed("https://www.khanacademy.org/math"));
        assert!(list.is_allowed("https://khanacademy.org"));
        assert!(!list.is_allowed("http://www.khanacademy.org"));
        assert!(!list.is_allowed("https://khanacademyfake.org"));
        assert!(!list.is_allowed("https://notkhanacademy.org"));
    }

    #[test]
    fn unparseable_input_is_denied() {
        let list = khan_whitelist();
        for input in [
            "",
            "   ",
            "not a url",
            "https://",
            "://www.khanacademy.org",
            "www.khanacademy.org",
            "javascript:alert(1)",
            "mailto:someone@khanacademy.org",
            "https://[::1",
        ] {
            assert!(!list.is_allowed(input), "{input:?} should be denied");
        }
    }

    #[test]
    fn blank_page_and_local_bundle_are_always_allowed() {
        let list = Whitelist::default();
        assert!(list.is_allowed("about:blank"));
        assert!(list.is_allowed("file:///opt/lockdown-browser/ui/index.html"));
        assert!(list.is_allowed("tauri://localhost/index.html"));
        assert!(list.is_allowed("http://tauri.localhost/index.html"));
    }

    #[test]
    fn bundle_marker_on_remote_host_is_not_an_exception() {
        let list = Whitelist::default();
        assert!(!list.is_allowed("https://evil.example/lockdown-browser/index.html"));
        assert!(!list.is_allowed("file:///home/user/Downloads/escape.html"));
    }

    #[test]
    fn app_protocol_is_only_exempt_for_the_local_host() {
        let list = Whitelist::default();
        assert!(list.is_allowed("tauri://localhost/surface/index.html"));
        assert!(!list.is_allowed("tauri://evil.example/index.html"));
        assert!(!list.is_allowed("tauri://localhost.evil.example/"));
    }

    #[test]
    fn patterns_preserve_declaration_order() {
        let list = khan_whitelist();
        assert_eq!(
            list.patterns(),
            vec!["https://www.khanacademy.org", "https://*.khanacademy.org"]
        );
    }

    #[test]
    fn entry_round_trips_through_serde() {
        let entries: Vec<WhitelistEntry> =
            serde_yaml::from_str("- https://*.ixl.com\n- https://www.google.com\n").unwrap();
        assert!(entries[0].wildcard_subdomain);
        let yaml = serde_yaml::to_string(&entries).unwrap();
        assert!(yaml.contains("https://*.ixl.com"));
    }
}
