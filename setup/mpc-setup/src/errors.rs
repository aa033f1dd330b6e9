use ark_serialize::SerializationError;
use libs::iotools::Hash;
use thiserror::Error;

/// Failures of a ceremony step. Every variant is fatal for the operation that
/// raised it; artifacts written earlier in the chain stay valid.
#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("Malformed file: {0}")]
    FormatError(String),

    #[error("Parameter mismatch on {field}: expected {expected}, found {actual}")]
    ParameterMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Hash mismatch on {what} of chunk {chunk_index}: expected {expected}, found {actual}")]
    HashMismatch {
        what: &'static str,
        chunk_index: usize,
        expected: String,
        actual: String,
    },

    #[error("Invalid proof of knowledge for {key} in chunk {chunk_index}")]
    ProofOfKnowledgeInvalid { key: &'static str, chunk_index: usize },

    #[error("Ratio check failed in chunk {chunk_index}: {check}")]
    RatioCheckFailed { check: String, chunk_index: usize },

    #[error("Chunk sequence error: {0}")]
    ChunkSequenceError(String),

    #[error("Degenerate contribution: {0}")]
    DegenerateContribution(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Binary serialization error: {0}")]
    BincodeError(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, CeremonyError>;

impl From<SerializationError> for CeremonyError {
    fn from(err: SerializationError) -> Self {
        match err {
            SerializationError::IoError(e) => CeremonyError::IoError(e),
            other => CeremonyError::FormatError(format!("invalid element encoding: {}", other)),
        }
    }
}

impl CeremonyError {
    pub fn mismatch(field: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
        CeremonyError::ParameterMismatch {
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn hash_mismatch(what: &'static str, chunk_index: usize, expected: &Hash, actual: &Hash) -> Self {
        CeremonyError::HashMismatch {
            what,
            chunk_index,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    pub fn ratio(chunk_index: usize, check: impl Into<String>) -> Self {
        CeremonyError::RatioCheckFailed { check: check.into(), chunk_index }
    }

    /// Process exit status reported by the binaries.
    pub fn exit_code(&self) -> i32 {
        match self {
            CeremonyError::FormatError(_) => 10,
            CeremonyError::ParameterMismatch { .. } => 11,
            CeremonyError::HashMismatch { .. } => 12,
            CeremonyError::ProofOfKnowledgeInvalid { .. } => 13,
            CeremonyError::RatioCheckFailed { .. } => 14,
            CeremonyError::ChunkSequenceError(_) => 15,
            CeremonyError::DegenerateContribution(_) => 16,
            CeremonyError::IoError(_) => 20,
            CeremonyError::JsonError(_) | CeremonyError::BincodeError(_) => 1,
        }
    }

    /// Short category name used in CLI output.
    pub fn category(&self) -> &'static str {
        match self {
            CeremonyError::FormatError(_) => "FormatError",
            CeremonyError::ParameterMismatch { .. } => "ParameterMismatch",
            CeremonyError::HashMismatch { .. } => "HashMismatch",
            CeremonyError::ProofOfKnowledgeInvalid { .. } => "ProofOfKnowledgeInvalid",
            CeremonyError::RatioCheckFailed { .. } => "RatioCheckFailed",
            CeremonyError::ChunkSequenceError(_) => "ChunkSequenceError",
            CeremonyError::DegenerateContribution(_) => "DegenerateContribution",
            CeremonyError::IoError(_) => "IoError",
            CeremonyError::JsonError(_) => "JsonError",
            CeremonyError::BincodeError(_) => "BincodeError",
        }
    }
}
