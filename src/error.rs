use std::fmt::Display;
use thiserror::Error;

/// Result type for block operations
pub type Result<T> = std::result::Result<T, BlockError>;

/// Error type returned by caller-supplied functions (accumulators, selectors, extractors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can complete a block or fail its construction
///
/// The type is `Clone` because a single fault is observed by every holder of the
/// block's [`Completion`](crate::Completion).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// Invalid construction arguments
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A caller-supplied function failed while handling a message
    #[error("{block} failed to process a message: {message}")]
    Processing { block: String, message: String },

    /// A downstream send was rejected where acceptance was guaranteed
    #[error("{block} could not deliver a message downstream")]
    SendFailure { block: String },

    /// Fault injected by a caller through `fault`
    #[error("{0}")]
    Fault(String),

    /// The processing thread could not be started
    #[error("failed to start {block}: {message}")]
    Spawn { block: String, message: String },

    /// Several distinct failures observed together
    #[error("{} error(s) occurred: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<BlockError>),
}

impl BlockError {
    pub fn configuration(message: impl Into<String>) -> Self {
        BlockError::Configuration(message.into())
    }

    pub fn fault(message: impl Into<String>) -> Self {
        BlockError::Fault(message.into())
    }

    /// Wrap a caller error raised inside `block`.
    pub fn processing(block: impl Into<String>, error: impl Display) -> Self {
        BlockError::Processing {
            block: block.into(),
            message: error.to_string(),
        }
    }

    /// Build an aggregate from `errors`, flattening nested aggregates and
    /// dropping duplicates while keeping first-seen order.
    pub fn aggregate(errors: impl IntoIterator<Item = BlockError>) -> Self {
        let mut distinct: Vec<BlockError> = Vec::new();
        for error in errors {
            for leaf in error.into_leaves() {
                if !distinct.contains(&leaf) {
                    distinct.push(leaf);
                }
            }
        }
        BlockError::Aggregate(distinct)
    }

    /// All non-aggregate errors contained in this one.
    pub fn leaves(&self) -> Vec<&BlockError> {
        match self {
            BlockError::Aggregate(errors) => errors.iter().flat_map(|e| e.leaves()).collect(),
            other => vec![other],
        }
    }

    fn into_leaves(self) -> Vec<BlockError> {
        match self {
            BlockError::Aggregate(errors) => {
                errors.into_iter().flat_map(|e| e.into_leaves()).collect()
            }
            other => vec![other],
        }
    }
}

fn join_messages(errors: &[BlockError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_flattens_and_dedupes() {
        let boom = BlockError::fault("boom");
        let nested = BlockError::aggregate([boom.clone(), BlockError::fault("bang")]);
        let error = BlockError::aggregate([boom.clone(), nested]);

        assert_eq!(
            error,
            BlockError::Aggregate(vec![boom, BlockError::fault("bang")])
        );
    }

    #[test]
    fn test_aggregate_message_lists_every_error() {
        let error = BlockError::aggregate([
            BlockError::processing("window", "bad time"),
            BlockError::fault("stop"),
        ]);
        let message = error.to_string();
        assert!(message.starts_with("2 error(s) occurred"));
        assert!(message.contains("window failed to process a message: bad time"));
        assert!(message.contains("stop"));
    }

    #[test]
    fn test_leaves_of_plain_error() {
        let error = BlockError::configuration("empty");
        assert_eq!(error.leaves(), vec![&error]);
    }
}
