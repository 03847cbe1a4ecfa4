use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParallelForError {
    #[error("Thread count must be at least 1, got {count}")]
    InvalidThreadCount { count: usize },

    #[error("Buffer of {buffer_len} elements cannot be split into planes of {plane_len} elements")]
    InvalidPlaneLength { buffer_len: usize, plane_len: usize },

    #[error("Thread panicked during parallel execution")]
    ThreadPanicked,
}

pub type ParallelForResult<T> = std::result::Result<T, ParallelForError>;
