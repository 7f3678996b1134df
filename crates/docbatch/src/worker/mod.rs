pub mod pool;

pub use pool::{FileResult, WorkerPool};
