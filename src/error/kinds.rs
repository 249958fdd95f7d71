use std::{fmt, io};

/// Crate-wide `Result` type using [`MongotabError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, MongotabError>;

/// Top-level error type for mongotab operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum MongotabError {
    /// Connection-related errors.
    Connection(ConnectionError),

    /// Configuration errors.
    Config(ConfigError),

    /// Schema discovery errors.
    Discovery(DiscoveryError),

    /// Export execution errors.
    Export(ExportError),

    /// I/O errors.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// Invalid connection URI.
    InvalidUri(String),

    /// No database name available from URI, flags, or config file.
    DatabaseNotSpecified,

    /// Ping command failed.
    PingFailed(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/// Discovery-specific errors.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The target collection does not exist.
    CollectionNotFound(String),

    /// Sampling the collection failed.
    SamplingFailed(String),
}

/// Export-specific errors.
#[derive(Debug)]
pub enum ExportError {
    /// The configured source collection does not exist.
    CollectionNotFound(String),

    /// The loaded configuration has no included fields.
    NoIncludedFields,

    /// Writing to the sink failed.
    WriteFailed(String),

    /// Invalid output path.
    InvalidPath(String),
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for MongotabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MongotabError::Connection(e) => write!(f, "Connection error: {e}"),
            MongotabError::Config(e) => write!(f, "Configuration error: {e}"),
            MongotabError::Discovery(e) => write!(f, "Discovery error: {e}"),
            MongotabError::Export(e) => write!(f, "Export error: {e}"),
            MongotabError::Io(e) => write!(f, "I/O error: {e}"),
            MongotabError::MongoDb(e) => write!(f, "MongoDB error: {e}"),
            MongotabError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::InvalidUri(uri) => write!(f, "Invalid connection URI: {uri}"),
            ConnectionError::DatabaseNotSpecified => {
                write!(f, "No database specified in URI, flags, or config file")
            }
            ConnectionError::PingFailed(msg) => write!(f, "Ping failed: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::CollectionNotFound(name) => {
                write!(f, "Collection not found: {name}")
            }
            DiscoveryError::SamplingFailed(msg) => write!(f, "Sampling failed: {msg}"),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::CollectionNotFound(name) => {
                write!(f, "Collection not found: {name}")
            }
            ExportError::NoIncludedFields => {
                write!(f, "Configuration has no included fields to export")
            }
            ExportError::WriteFailed(msg) => write!(f, "Write failed: {msg}"),
            ExportError::InvalidPath(path) => write!(f, "Invalid output path: {path}"),
        }
    }
}

impl std::error::Error for MongotabError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for DiscoveryError {}
impl std::error::Error for ExportError {}

/* ========================= Conversions to MongotabError ========================= */

impl From<io::Error> for MongotabError {
    fn from(err: io::Error) -> Self {
        MongotabError::Io(err)
    }
}

impl From<mongodb::error::Error> for MongotabError {
    fn from(err: mongodb::error::Error) -> Self {
        MongotabError::MongoDb(err)
    }
}

impl From<ConnectionError> for MongotabError {
    fn from(err: ConnectionError) -> Self {
        MongotabError::Connection(err)
    }
}

impl From<ConfigError> for MongotabError {
    fn from(err: ConfigError) -> Self {
        MongotabError::Config(err)
    }
}

impl From<DiscoveryError> for MongotabError {
    fn from(err: DiscoveryError) -> Self {
        MongotabError::Discovery(err)
    }
}

impl From<ExportError> for MongotabError {
    fn from(err: ExportError) -> Self {
        MongotabError::Export(err)
    }
}

impl From<String> for MongotabError {
    fn from(msg: String) -> Self {
        MongotabError::Generic(msg)
    }
}

impl From<&str> for MongotabError {
    fn from(msg: &str) -> Self {
        MongotabError::Generic(msg.to_owned())
    }
}

impl From<serde_json::Error> for MongotabError {
    fn from(err: serde_json::Error) -> Self {
        MongotabError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}
