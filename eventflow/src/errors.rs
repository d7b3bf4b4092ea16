//! Error types for the eventflow engine.
//!
//! Three families are distinguished:
//!
//! - [`ConfigurationError`]: structural defects found while building or
//!   validating an analysis. Always raised before any chunk is processed.
//! - [`DataError`]: a single chunk could not be processed. Carries the chunk
//!   identifier once it is known.
//! - [`MergeError`]: partial outputs that cannot be combined.
//!
//! Non-finite weights are not errors; they are counted in the output.

use crate::core::ChunkId;
use crate::pipeline::FailureRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for eventflow operations.
#[derive(Debug, Error)]
pub enum EventflowError {
    /// The analysis configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A chunk could not be processed.
    #[error("{0}")]
    Data(#[from] DataError),

    /// Partial outputs could not be merged.
    #[error("{0}")]
    Merge(#[from] MergeError),

    /// One or more chunks failed; nothing was merged.
    #[error("{0}")]
    ChunksFailed(#[from] ChunksFailedError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a configuration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONFIG-001-DUPLICATE_VARIATION").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when an analysis configuration is structurally invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Configuration error: {message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// Names of the things involved (variations, calibrators, categories...).
    pub subjects: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            subjects: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the subjects involved.
    #[must_use]
    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// A variation name was registered twice by different owners.
    #[must_use]
    pub fn duplicate_variation(name: &str, existing: &str, incoming: &str) -> Self {
        Self::new(format!(
            "Variation '{name}' is already registered by '{existing}', cannot register it again from '{incoming}'"
        ))
        .with_subjects(vec![name.to_string(), existing.to_string(), incoming.to_string()])
        .with_error_info(
            ErrorInfo::new("CONFIG-001-DUPLICATE_VARIATION", "Variation names must be globally unique")
                .with_fix_hint("Rename one of the variations or drop one of the calibrators."),
        )
    }

    /// A variation name was registered with two different kinds.
    #[must_use]
    pub fn conflicting_variation_kind(name: &str, existing: &str, incoming: &str) -> Self {
        Self::new(format!(
            "Variation '{name}' is registered as a {existing} variation, cannot re-register it as {incoming}"
        ))
        .with_subjects(vec![name.to_string()])
        .with_error_info(ErrorInfo::new(
            "CONFIG-002-VARIATION_KIND",
            "A variation is either a shape or a weight variation",
        ))
    }

    /// A required column or collection is absent from the input schema.
    #[must_use]
    pub fn missing_column(owner: &str, column: &str) -> Self {
        Self::new(format!("'{owner}' requires '{column}', which the input does not provide"))
            .with_subjects(vec![owner.to_string(), column.to_string()])
            .with_error_info(
                ErrorInfo::new("CONFIG-003-MISSING_COLUMN", format!("Missing input '{column}'"))
                    .with_fix_hint("Check the input schema or add a calibrator that produces it earlier in the chain."),
            )
    }

    /// A collection lacks a field that a step reads.
    #[must_use]
    pub fn missing_field(owner: &str, collection: &str, field: &str) -> Self {
        Self::new(format!(
            "'{owner}' requires field '{field}' of '{collection}', which the input does not provide"
        ))
        .with_subjects(vec![owner.to_string(), collection.to_string(), field.to_string()])
        .with_error_info(
            ErrorInfo::new("CONFIG-003-MISSING_COLUMN", format!("Missing input '{collection}.{field}'"))
                .with_context_entry("collection", collection)
                .with_fix_hint("Check the input schema or the fields the step is configured to read."),
        )
    }

    /// Derived collections refer to each other in a cycle.
    #[must_use]
    pub fn derivation_cycle(workflow: &str, collections: &[String]) -> Self {
        Self::new(format!(
            "Workflow '{workflow}' cannot order derived collections {collections:?}: each depends on another"
        ))
        .with_subjects(collections.to_vec())
        .with_error_info(
            ErrorInfo::new("CONFIG-011-DERIVATION_CYCLE", "Derived collections must not depend on each other in a cycle")
                .with_fix_hint("Derive one of them from an input collection instead."),
        )
    }

    /// A weight variation targets a weight not applied inside its scope.
    #[must_use]
    pub fn unapplied_weight_variation(name: &str, sample: &str, category: &str) -> Self {
        Self::new(format!(
            "Weight variation '{name}' is declared for sample '{sample}' in category '{category}', where weight '{name}' is not applied"
        ))
        .with_subjects(vec![name.to_string(), sample.to_string(), category.to_string()])
        .with_error_info(
            ErrorInfo::new("CONFIG-012-UNAPPLIED_WEIGHT_VARIATION", "A weight variation must vary a weight applied in its scope")
                .with_fix_hint("Apply the weight in that category or narrow the variation's scope."),
        )
    }

    /// A scope references a sample or category that is not defined.
    #[must_use]
    pub fn undefined_reference(what: &str, name: &str, referenced_by: &str) -> Self {
        Self::new(format!("'{referenced_by}' references undefined {what} '{name}'"))
            .with_subjects(vec![name.to_string(), referenced_by.to_string()])
            .with_error_info(
                ErrorInfo::new("CONFIG-004-UNDEFINED_SCOPE", format!("Unknown {what} '{name}'"))
                    .with_context_entry("kind", what),
            )
    }

    /// A calibrator, cut, weight or workflow name could not be resolved.
    #[must_use]
    pub fn unknown_component(what: &str, name: &str) -> Self {
        Self::new(format!("Unknown {what} '{name}'"))
            .with_subjects(vec![name.to_string()])
            .with_error_info(
                ErrorInfo::new("CONFIG-005-UNKNOWN_COMPONENT", format!("No {what} named '{name}'"))
                    .with_fix_hint("Declare it inline or register it in the component registry."),
            )
    }

    /// A shape variation does not declare both directions.
    #[must_use]
    pub fn incomplete_shape_variation(name: &str, owner: &str) -> Self {
        Self::new(format!(
            "Shape variation '{name}' declared by '{owner}' must provide both up and down"
        ))
        .with_subjects(vec![name.to_string(), owner.to_string()])
        .with_error_info(ErrorInfo::new(
            "CONFIG-006-INCOMPLETE_SHAPE",
            "Shape variations come in up/down pairs",
        ))
    }

    /// A calibrator reads a collection that a later calibrator writes.
    #[must_use]
    pub fn calibrator_order(calibrator: &str, collection: &str, writer: &str) -> Self {
        Self::new(format!(
            "Calibrator '{calibrator}' reads '{collection}' which is written later by '{writer}'"
        ))
        .with_subjects(vec![calibrator.to_string(), writer.to_string()])
        .with_error_info(
            ErrorInfo::new("CONFIG-007-CALIBRATOR_ORDER", "Calibrators must be declared in dependency order")
                .with_fix_hint(format!("Move '{writer}' before '{calibrator}'.")),
        )
    }

    /// A weight component is resolved twice for the same sample and category.
    #[must_use]
    pub fn duplicate_weight(name: &str, sample: &str, category: &str) -> Self {
        Self::new(format!(
            "Weight '{name}' is applied twice for sample '{sample}' in category '{category}'"
        ))
        .with_subjects(vec![name.to_string(), sample.to_string(), category.to_string()])
        .with_error_info(
            ErrorInfo::new("CONFIG-009-DUPLICATE_WEIGHT", "A weight may appear once per sample and category")
                .with_fix_hint("Remove it from one of the layers or list it in the sample's 'exclude'."),
        )
    }

    /// A histogram axis has unusable binning.
    #[must_use]
    pub fn bad_binning(histogram: &str, reason: &str) -> Self {
        Self::new(format!("Histogram '{histogram}' has invalid binning: {reason}"))
            .with_subjects(vec![histogram.to_string()])
            .with_error_info(
                ErrorInfo::new("CONFIG-010-BAD_BINNING", reason.to_string())
                    .with_fix_hint("Give either bins/start/stop with start < stop or strictly increasing edges."),
            )
    }

    /// Any other invalid setting.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(message.clone()).with_error_info(ErrorInfo::new("CONFIG-008-INVALID", message))
    }
}

/// What went wrong inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum DataErrorKind {
    /// An event-level column is absent.
    MissingColumn(String),
    /// An object collection is absent.
    MissingCollection(String),
    /// A field of a collection is absent.
    MissingField {
        /// Collection name.
        collection: String,
        /// Field name.
        field: String,
    },
    /// An array has the wrong length.
    LengthMismatch {
        /// Column, field or collection name.
        name: String,
        /// Expected length.
        expected: usize,
        /// Actual length.
        found: usize,
    },
    /// A pass names a shape variation no calibrator owns.
    UnknownVariation(String),
    /// Input content is malformed.
    Malformed(String),
    /// Reading the input failed.
    Io(String),
}

impl fmt::Display for DataErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColumn(name) => write!(f, "missing column '{name}'"),
            Self::MissingCollection(name) => write!(f, "missing collection '{name}'"),
            Self::MissingField { collection, field } => {
                write!(f, "missing field '{field}' in collection '{collection}'")
            }
            Self::LengthMismatch { name, expected, found } => {
                write!(f, "'{name}' has length {found}, expected {expected}")
            }
            Self::UnknownVariation(name) => write!(f, "no calibrator owns shape variation '{name}'"),
            Self::Malformed(msg) => write!(f, "malformed input: {msg}"),
            Self::Io(msg) => write!(f, "read failure: {msg}"),
        }
    }
}

/// Error raised when a chunk's content cannot be processed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct DataError {
    /// The chunk, once known.
    pub chunk: Option<ChunkId>,
    /// What went wrong.
    pub kind: DataErrorKind,
    /// Whether retrying the chunk may succeed.
    pub retryable: bool,
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.chunk {
            Some(chunk) => write!(f, "Data error in chunk {chunk}: {}", self.kind),
            None => write!(f, "Data error: {}", self.kind),
        }
    }
}

impl DataError {
    /// Creates a non-retryable data error.
    #[must_use]
    pub fn new(kind: DataErrorKind) -> Self {
        Self {
            chunk: None,
            kind,
            retryable: false,
        }
    }

    /// Missing event-level column.
    #[must_use]
    pub fn missing_column(name: impl Into<String>) -> Self {
        Self::new(DataErrorKind::MissingColumn(name.into()))
    }

    /// Missing collection.
    #[must_use]
    pub fn missing_collection(name: impl Into<String>) -> Self {
        Self::new(DataErrorKind::MissingCollection(name.into()))
    }

    /// Missing collection field.
    #[must_use]
    pub fn missing_field(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(DataErrorKind::MissingField {
            collection: collection.into(),
            field: field.into(),
        })
    }

    /// Length mismatch.
    #[must_use]
    pub fn length_mismatch(name: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::new(DataErrorKind::LengthMismatch {
            name: name.into(),
            expected,
            found,
        })
    }

    /// Shape variation without an owning calibrator.
    #[must_use]
    pub fn unknown_variation(name: impl Into<String>) -> Self {
        Self::new(DataErrorKind::UnknownVariation(name.into()))
    }

    /// Malformed input.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(DataErrorKind::Malformed(message.into()))
    }

    /// Transient read failure; retryable.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(DataErrorKind::Io(message.into()))
        }
    }

    /// Attaches the chunk identifier.
    #[must_use]
    pub fn with_chunk(mut self, chunk: ChunkId) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Short label for the error kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            DataErrorKind::MissingColumn(_) => "missing_column",
            DataErrorKind::MissingCollection(_) => "missing_collection",
            DataErrorKind::MissingField { .. } => "missing_field",
            DataErrorKind::LengthMismatch { .. } => "length_mismatch",
            DataErrorKind::UnknownVariation(_) => "unknown_variation",
            DataErrorKind::Malformed(_) => "malformed",
            DataErrorKind::Io(_) => "io",
        }
    }
}

/// Error raised when two partial outputs cannot be combined.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    /// Accumulators under the same key have different binning.
    #[error("Cannot merge '{key}': incompatible binning")]
    IncompatibleBinning {
        /// The accumulator key.
        key: String,
    },

    /// The same chunk contributes to both sides.
    #[error("Chunk {chunk} is present in both partial outputs")]
    DuplicateChunk {
        /// The duplicated chunk.
        chunk: ChunkId,
    },
}

/// Aggregate error for a run in which chunks failed.
#[derive(Debug, Clone, Error)]
pub struct ChunksFailedError {
    /// Every failed chunk with its last error.
    pub failures: Vec<FailureRecord>,
}

impl fmt::Display for ChunksFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} chunk(s) failed, no output was merged:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.chunk, failure.error)?;
        }
        Ok(())
    }
}

impl ChunksFailedError {
    /// Identifiers of the failed chunks.
    #[must_use]
    pub fn chunk_ids(&self) -> Vec<&ChunkId> {
        self.failures.iter().map(|f| &f.chunk).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("calibrator", "jets");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("calibrator"), Some(&"jets".to_string()));
    }

    #[test]
    fn test_duplicate_variation_code() {
        let err = ConfigurationError::duplicate_variation("JES_Total", "jets", "fatjets");
        assert_eq!(err.code(), Some("CONFIG-001-DUPLICATE_VARIATION"));
        assert!(err.to_string().contains("JES_Total"));
        assert_eq!(err.subjects.len(), 3);
    }

    #[test]
    fn test_calibrator_order_hint() {
        let err = ConfigurationError::calibrator_order("met", "Jet", "jets");
        let hint = err.error_info.and_then(|i| i.fix_hint).unwrap();
        assert!(hint.contains("Move 'jets' before 'met'"));
    }

    #[test]
    fn test_data_error_display_with_chunk() {
        let chunk = ChunkId::new("TTTo2L2Nu", "f.root", 0, 100);
        let err = DataError::missing_column("PV_npvsGood").with_chunk(chunk);
        let text = err.to_string();
        assert!(text.contains("TTTo2L2Nu:f.root[0..100]"));
        assert!(text.contains("PV_npvsGood"));
        assert!(!err.retryable);
    }

    #[test]
    fn test_io_error_is_retryable() {
        let err = DataError::io("connection reset");
        assert!(err.retryable);
        assert_eq!(err.kind_name(), "io");
    }
}
