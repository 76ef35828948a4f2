use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A `VaultConfig` value failed validation or could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The log filter is invalid or a global subscriber is already set.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
