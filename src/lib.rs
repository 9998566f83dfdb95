pub mod access;
pub mod cwd;
pub mod dir;
pub mod disk;
pub mod error;
pub mod fat;
pub mod fs;
pub mod shell;

pub use error::{FileSystemError, Result};
