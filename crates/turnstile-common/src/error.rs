use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Conflict("gateway GATE-02 already registered".into());
        assert_eq!(
            e.to_string(),
            "conflict: gateway GATE-02 already registered"
        );

        let e = Error::NotFound("member QR-123".into());
        assert_eq!(e.to_string(), "not found: member QR-123");

        let e = Error::MalformedInput("missing QR Code ID column".into());
        assert_eq!(e.to_string(), "malformed input: missing QR Code ID column");

        let e = Error::Other("misc".into());
        assert_eq!(e.to_string(), "misc");
    }
}
