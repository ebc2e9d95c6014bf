use thiserror::Error;

/// Errors surfaced by the surveillance engine.
///
/// Categories follow the disposition table in the design: transient kernel hiccups are never
/// represented here (they are handled and retried before they would become one of these), while
/// everything that reaches a caller is either a setup failure (fatal) or a per-node failure that
/// the retry/backoff policy can act on.
#[derive(Error, Debug)]
pub enum SurveilError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("watch error for {path}: {source}")]
    Watch {
        path: std::path::PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("node {0} not found")]
    NodeNotFound(u64),

    #[error("path {0} escapes its watched root")]
    PathEscapesRoot(std::path::PathBuf),

    #[error("action execution failed: {0}")]
    ExecutionFailed(String),

    #[error("retry budget exhausted for {0}")]
    RetryExhausted(std::path::PathBuf),

    #[error("internal inconsistency: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SurveilError>;
