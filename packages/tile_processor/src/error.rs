use std::io;

use thiserror::Error;

/// Errors that can occur when operating a [`TaskProcessor`][crate::TaskProcessor].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The operating system refused to create one of the worker threads.
    ///
    /// Any workers already started when this happens are shut down before the error is returned.
    #[error("failed to spawn worker thread {worker_index}: {source}")]
    WorkerSpawn {
        /// Index of the worker that could not be started.
        worker_index: usize,

        /// The error reported by the operating system.
        source: io::Error,
    },
}

/// A specialized `Result` type for tile processor operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
