use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Load error: {0}")]
    Load(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("No 'result' variable in generated script")]
    MissingResult,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
