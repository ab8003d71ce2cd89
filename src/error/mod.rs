use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Operation not supported")]
    NotSupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl FsError {
    /// Nearest OS error code for this error. Only the FUSE adapter calls this.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::InvalidCredentials(_) => libc::EACCES,
            FsError::Parse(_) => libc::EREMOTEIO,
            FsError::NotFound(_) => libc::ENOENT,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::NotSupported => libc::ENOSYS,
            FsError::Network(_) | FsError::Session(_) | FsError::Io(_) | FsError::Config(_) => {
                libc::EIO
            }
        }
    }
}

impl From<reqwest::Error> for FsError {
    fn from(e: reqwest::Error) -> Self {
        FsError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
