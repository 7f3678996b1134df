pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent};
