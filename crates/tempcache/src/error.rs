//! Error types for the tempcache service

use std::fmt;

#[derive(Debug)]
pub enum TempcacheError {
    /// The operation required a tracked key that is not in the counter map
    KeyNotFound(String),
    /// The key would not map to a single file directly under the root
    InvalidKey(String),
    /// A name that does not match any operation
    UnknownOperation(String),
    Io(Box<std::io::Error>),
    InvalidConfig(String),
    /// Anything the handler did not anticipate (including panics)
    Unexpected(String),
}

impl TempcacheError {
    /// True for errors that mean "nothing is stored under this key"
    pub fn is_not_found(&self) -> bool {
        match self {
            TempcacheError::KeyNotFound(_) => true,
            TempcacheError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl fmt::Display for TempcacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempcacheError::KeyNotFound(key) => write!(f, "Key not found: {}", key),
            TempcacheError::InvalidKey(key) => write!(f, "Invalid key: {:?}", key),
            TempcacheError::UnknownOperation(name) => write!(f, "Unknown operation: {}", name),
            TempcacheError::Io(err) => write!(f, "IO error: {}", err),
            TempcacheError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            TempcacheError::Unexpected(msg) => write!(f, "Unexpected error: {}", msg),
        }
    }
}

impl std::error::Error for TempcacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TempcacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TempcacheError {
    fn from(err: std::io::Error) -> Self {
        TempcacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, TempcacheError>;
