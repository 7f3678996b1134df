pub mod aggregate;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod merge;
pub mod quota;
pub mod reaper;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;
pub mod token;
pub mod types;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, ServiceConfig};
pub use error::{
    AdmissionError, ConfigError, DocbatchError, ExtractionError, MergeError, Result, StorageError,
    TokenError,
};
pub use extract::{Extraction, ExtractionAdapter, TextExtractor};
pub use merge::{MergeFormat, Merger};
pub use quota::{Admission, QuotaGuard, UsageTracker};
pub use reaper::Reaper;
pub use scheduler::{Claim, Scheduler};
pub use service::BatchService;
pub use storage::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use store::{BatchStore, FileOutcome, FileSpec, JobSpec};
pub use token::TokenService;
pub use types::{FileStatus, JobStatus};
pub use worker::{FileResult, WorkerPool};
