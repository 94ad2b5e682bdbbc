use thiserror::Error;

/// Error type for record construction, filtering, statistics and tool calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiveLogError {
    #[error("malformed record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("filter '{name}' not found. Available: {valid}")]
    FilterNotFound { name: String, valid: String },

    #[error("unknown statistic type: {name}. Available: {valid}")]
    UnknownStatistic { name: String, valid: String },

    #[error("unknown tool: {name}. Available: {valid}")]
    UnknownTool { name: String, valid: String },

    #[error("{0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DiveLogError {
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        DiveLogError::MalformedRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DiveLogError::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DiveLogError>;

/// Joins registered names into the list carried by lookup errors.
pub(crate) fn name_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().collect::<Vec<_>>().join(", ")
}
