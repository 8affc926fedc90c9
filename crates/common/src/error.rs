//! Workspace-wide error type for configuration and file handling

use thiserror::Error;

/// Errors raised while loading configuration or touching the filesystem.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using the shared Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = Error::Config("accounts.path is empty".into());
        assert_eq!(err.to_string(), "configuration error: accounts.path is empty");

        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().starts_with("io error:"), "got: {err}");
    }

    #[test]
    fn debug_names_the_variant() {
        let err = Error::Config("bad".into());
        assert!(format!("{err:?}").contains("Config"));
    }
}
