use crate::commands::CommandType;
use crate::settings::ValidationError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("no handler registered for command {0}")]
    UnroutableCommand(CommandType),

    #[error("chapter index {index} is out of range (book has {len} chapters)")]
    InvalidChapterIndex { index: usize, len: usize },

    #[error("content service call failed: {context}")]
    GatewayFailure {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("fetch result for generation {generation} superseded by {current}")]
    StaleResult { generation: u64, current: u64 },

    #[error("invalid settings: {}", summarize(.0))]
    InvalidSettings(Vec<ValidationError>),

    #[error("command worker for {0} is no longer running")]
    WorkerGone(CommandType),
}

impl ReaderError {
    pub fn gateway(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ReaderError::GatewayFailure {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Full cause chain on one line, for error logs.
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
