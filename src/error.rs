use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid month range: {0}")]
    MonthRange(String),

    #[error("Schema mismatch in {file}: missing columns {missing:?}")]
    Schema { file: String, missing: Vec<String> },

    #[error("API error: {message}")]
    Api { message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
