use thiserror::Error;

/// Errors produced by the quiz core and its store.
#[derive(Debug, Error)]
pub enum QuizError {
    #[error("user already has an active quiz")]
    AlreadyActive,

    #[error("question has already been answered or timed out")]
    StaleSubmission,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid question bank: {0}")]
    InvalidQuestionBank(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl QuizError {
    /// Text shown to the chat user when an operation fails.
    pub fn user_message(&self) -> String {
        match self {
            QuizError::AlreadyActive => {
                "You already have an active quiz. Please finish it first.".to_owned()
            }
            QuizError::StaleSubmission => {
                "This question has already been answered or timed out".to_owned()
            }
            QuizError::NotFound(what) => format!("{what} not found."),
            QuizError::InvalidArgument(hint) => hint.clone(),
            _ => "Something went wrong. Please try again later.".to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} should be set")]
    Missing(&'static str),

    #[error("{name} can't be parsed: {reason}")]
    Invalid { name: &'static str, reason: String },
}
