pub mod check;
pub mod config;
pub mod run;
pub mod utils;

pub use check::check_urls;
pub use run::{run, RunArgs};
