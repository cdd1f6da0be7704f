//! Process bootstrap: the `.env` file and the tracing subscriber.

use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Loads `path`, or `.env` searched upward from the working directory, into
/// the process environment. A missing file is not an error.
pub fn load_dotenv(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => dotenvy::from_path(path).ok().map(|()| path.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    }
}

/// `RUST_LOG`, or [`DEFAULT_FILTER`] when it is unset or unparsable.
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Loads the environment file first so a `RUST_LOG` it sets reaches the
/// filter, then installs the global subscriber.
pub fn init(json: bool) -> Option<PathBuf> {
    let dotenv = load_dotenv(None);
    let builder = tracing_subscriber::fmt().with_env_filter(log_filter());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    dotenv
}
