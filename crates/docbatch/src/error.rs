use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocbatchError {
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid transition for file '{file}': {reason}")]
    InvalidTransition { file: String, reason: String },
}

/// Errors surfaced by the quota guard before a job is created.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Page quota exceeded: requested {requested}, {remaining} remaining")]
    QuotaExceeded {
        requested: u64,
        remaining: u64,
        /// Set when the owner is on the lowest plan tier and should be
        /// offered an upgrade instead of a retry.
        requires_upgrade: bool,
    },

    #[error("A job must contain at least one file")]
    EmptyJob,

    #[error("Priority {0} is out of range (expected 1..=10)")]
    InvalidPriority(i64),

    #[error("Merge was requested but no merge format was given")]
    MissingMergeFormat,

    #[error("Usage lookup failed for owner '{owner}': {reason}")]
    UsageLookup { owner: String, reason: String },
}

/// Per-file extraction failures reported by the worker adapter.
///
/// Transient errors are retried a bounded number of times before the
/// file is marked permanently failed; permanent errors fail immediately.
#[derive(Error, Debug, Clone)]
pub enum ExtractionError {
    #[error("Transient extraction error [{code}]: {message}")]
    Transient { code: String, message: String },

    #[error("Permanent extraction error [{code}]: {message}")]
    Permanent { code: String, message: String },
}

impl ExtractionError {
    pub fn transient(code: &str, message: &str) -> Self {
        Self::Transient {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn permanent(code: &str, message: &str) -> Self {
        Self::Permanent {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. } | Self::Permanent { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message, .. } => message,
        }
    }
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Job '{job_id}' is not ready to merge: {pending} file(s) still pending or processing")]
    NotReady { job_id: String, pending: u64 },

    #[error("Job '{0}' has no successfully completed files to merge")]
    NothingToMerge(String),

    #[error("Unknown merge format '{0}'")]
    UnknownFormat(String),

    #[error("Failed to build word document: {0}")]
    DocumentBuild(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Download token has expired")]
    Expired,

    #[error("Download token not found")]
    NotFound,

    #[error("Failed to generate token: {0}")]
    Generation(#[from] getrandom::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write blob '{reference}': {source}")]
    WriteBlob {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob '{reference}': {source}")]
    ReadBlob {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete blob '{reference}': {source}")]
    DeleteBlob {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob not found: {0}")]
    BlobNotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, DocbatchError>;
