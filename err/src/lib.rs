#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("FS: {0}")]
    Fs(FsError),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("Inconsistent")]
    Inconsistent,
    #[error("Not found")]
    NotFound,
    #[error("Already exists")]
    AlreadyExists,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("Invalid name")]
    InvalidName,
    #[error("No space left")]
    NoSpace,
}

impl Error {
    /// Conditions the shell swallows without a message; everything else is
    /// fatal to the session.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Error::Fs(
                FsError::NotFound
                    | FsError::AlreadyExists
                    | FsError::NotADirectory
                    | FsError::IsADirectory
                    | FsError::InvalidName
            )
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;
