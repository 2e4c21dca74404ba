use std::fmt;

/// Main error type for cadence
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),

    /// Database errors (SQLx wrapped)
    Database(sqlx::Error),

    /// HTTP/Network errors
    Network(String),

    /// Validation errors (payload or YAML malformed, declarative constraint violated)
    Validation(String),

    /// Not found errors
    NotFound(String),

    /// Execution requested against a disabled job via a mode that forbids it
    Forbidden(String),

    /// A non-overlapping execution was requested while one is in flight
    AlreadyRunning(String),

    /// A terminal execution row was written to a second time
    AlreadyTerminal(String),

    /// The execution backend failed to run at all
    Backend(String),

    /// The backend exceeded its deadline
    Timeout(String),

    /// An assigned execution outlived its agent's heartbeats
    AgentLost(String),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),

    /// YAML parse errors
    Yaml(serde_yaml::Error),

    /// IO errors
    Io(std::io::Error),

    /// Generic errors with description
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Database(e) => write!(f, "Storage error: {}", e),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Error::AlreadyRunning(msg) => write!(f, "Already running: {}", msg),
            Error::AlreadyTerminal(msg) => write!(f, "Already terminal: {}", msg),
            Error::Backend(msg) => write!(f, "Backend error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::AgentLost(msg) => write!(f, "Agent lost: {}", msg),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Yaml(e) => write!(f, "YAML error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Yaml(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::Yaml(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("Invalid UUID: {}", error))
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new forbidden error
    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        Error::Forbidden(msg.into())
    }

    /// Create a new already-running error
    pub fn already_running<T: Into<String>>(msg: T) -> Self {
        Error::AlreadyRunning(msg.into())
    }

    /// Create a new already-terminal error
    pub fn already_terminal<T: Into<String>>(msg: T) -> Self {
        Error::AlreadyTerminal(msg.into())
    }

    /// Create a new backend error
    pub fn backend<T: Into<String>>(msg: T) -> Self {
        Error::Backend(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new agent-lost error
    pub fn agent_lost<T: Into<String>>(msg: T) -> Self {
        Error::AgentLost(msg.into())
    }

    /// Create a new network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        Error::Network(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Forbidden(_) => 403,
            Error::AlreadyRunning(_) => 409,
            Error::AlreadyTerminal(_) => 409,
            Error::Timeout(_) => 504,
            Error::Network(_) => 503,
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Backend(_) => 500,
            Error::AgentLost(_) => 500,
            Error::Serialization(_) => 500,
            Error::Yaml(_) => 400,
            Error::Io(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "storage_error",
            Error::Network(_) => "network",
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::AlreadyRunning(_) => "already_running",
            Error::AlreadyTerminal(_) => "already_terminal",
            Error::Backend(_) => "backend_error",
            Error::Timeout(_) => "timeout",
            Error::AgentLost(_) => "agent_lost",
            Error::Serialization(_) => "serialization",
            Error::Yaml(_) => "validation_error",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("bad").status_code(), 400);
        assert_eq!(Error::not_found("gone").status_code(), 404);
        assert_eq!(Error::forbidden("disabled").status_code(), 403);
        assert_eq!(Error::already_running("j1").status_code(), 409);
        assert_eq!(Error::already_terminal("e1").status_code(), 409);
        assert_eq!(Error::backend("no interpreter").status_code(), 500);
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::validation("x").category(), "validation_error");
        assert_eq!(Error::agent_lost("a1").category(), "agent_lost");
        assert_eq!(Error::already_terminal("e").category(), "already_terminal");
    }

    #[test]
    fn test_display() {
        let err = Error::already_running("job j1 has an active execution");
        assert!(err.to_string().contains("Already running"));
    }
}
