use lashmap::LashError;
use thiserror::Error;

/// Errors that can occur when working with a typed disk map
#[derive(Error, Debug)]
pub enum TypedMapError {
    /// The underlying byte map failed
    #[error(transparent)]
    Map(#[from] LashError),

    /// Encoding errors when converting data to bytes
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Decoding errors when converting bytes back to data
    #[error("Decoding error: {0}")]
    Decoding(String),
}

pub type Result<T> = std::result::Result<T, TypedMapError>;
