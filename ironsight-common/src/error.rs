//! Common error types for Ironsight

use thiserror::Error;

/// Common result type for Ironsight operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by Ironsight crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_error_converts() {
        let err: Error = toml::from_str::<toml::Value>("key = ").unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)));
        assert!(err.to_string().starts_with("TOML parse error"));
    }
}
