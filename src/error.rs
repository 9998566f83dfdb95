use crate::disk::DiskError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FileSystemError {
    #[error("no free block left on the volume")]
    NoSpace,
    #[error("name '{name}' is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },
    #[error("'{name}' already exists")]
    NameCollision { name: String },
    #[error("'{path}' not found")]
    NotFound { path: String },
    #[error("'{name}' is not a directory")]
    NotADirectory { name: String },
    #[error("'{name}' is a directory")]
    IsADirectory { name: String },
    #[error("directory '{name}' is not empty")]
    DirectoryNotEmpty { name: String },
    #[error("permission denied")]
    PermissionDenied,
    #[error("no free entry left in the directory")]
    DirectoryFull,
    #[error("invalid access rights '{literal}'")]
    ParseError { literal: String },
    #[error("invalid path '{path}'")]
    InvalidPath { path: String },
    #[error("allocation chain is corrupted at block {block}")]
    Corrupted { block: usize },
    #[error("malformed directory entry: {0}")]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Disk(#[from] DiskError),
}

pub type Result<T> = std::result::Result<T, FileSystemError>;
