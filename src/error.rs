use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("retrieval failed: {message}")]
    Retrieval { message: String, transient: bool },

    #[error("reranker unavailable: {0}")]
    RerankUnavailable(String),

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EvalError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
            transient: false,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Retrieval {
                transient: true,
                ..
            }
        )
    }
}
