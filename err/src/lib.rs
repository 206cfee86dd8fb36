#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Not implemented")]
    Unimplemented,
    #[error("IO: {0}")]
    Io(IoError),
    #[error("FS: {0}")]
    Fs(FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("Read-only")]
    ReadOnly,
    #[error("Out of bounds")]
    OutOfBounds,
    #[error("OS error: {0}")]
    Os(String),
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("Inconsistent")]
    Inconsistent,
    #[error("Index")]
    Index,
    #[error("Not found")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("Directory not empty")]
    NotEmpty,
    #[error("No space left on device")]
    NoSpace,
    #[error("Name too long")]
    NameTooLong,
    #[error("Invalid handle")]
    InvalidHandle,
    #[error("Unsupported")]
    Unsupported,
}

pub type Result<T> = core::result::Result<T, Error>;
