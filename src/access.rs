use crate::dir::DirBlock;
use crate::disk::Disk;
use crate::error::{FileSystemError, Result};
use crate::fat::ROOT_BLOCK;
use crate::fs::FatFileSystem;
use bitflags::bitflags;
use log::warn;
use std::fmt;

bitflags! {
    /// Access rights recorded for an entry in its parent directory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessRights: u8 {
        const READ = 0x04;
        const WRITE = 0x02;
        const EXEC = 0x01;
    }
}

impl AccessRights {
    pub const FILE_DEFAULT: Self = Self::READ.union(Self::WRITE);
    pub const DIR_DEFAULT: Self = Self::READ.union(Self::WRITE).union(Self::EXEC);
}

impl fmt::Display for AccessRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |bit: AccessRights, c: char| if self.contains(bit) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(AccessRights::READ, 'r'),
            flag(AccessRights::WRITE, 'w'),
            flag(AccessRights::EXEC, 'x')
        )
    }
}

/// Rights of the child whose chain starts at `child_block`, as recorded by its parent.
pub fn rights_in_parent(child_block: usize, parent: &DirBlock) -> Option<AccessRights> {
    parent.find_by_block(child_block).map(|entry| entry.rights)
}

impl<D: Disk> FatFileSystem<D> {
    /// Whether `required` is granted on `target_block`.
    ///
    /// A directory's rights live in its parent, so the parent is opened and the
    /// previously loaded directory is restored before returning. A file's
    /// parent is the directory currently loaded. The root is always accessible.
    pub fn check(
        &mut self,
        required: AccessRights,
        target_block: usize,
        is_directory: bool,
    ) -> Result<bool> {
        if target_block == ROOT_BLOCK {
            return Ok(true);
        }

        let rights = if is_directory {
            self.cwd.scoped(&mut self.disk, |cwd, disk| {
                cwd.open(disk, target_block)?;
                let parent = cwd
                    .entries()
                    .parent()
                    .ok_or(FileSystemError::Corrupted {
                        block: target_block,
                    })?;
                cwd.open(disk, parent)?;
                Ok(rights_in_parent(target_block, cwd.entries()))
            })?
        } else {
            rights_in_parent(target_block, self.cwd.entries())
        };

        Ok(rights.map_or(false, |r| r.contains(required)))
    }

    pub(crate) fn authorize(
        &mut self,
        required: AccessRights,
        target_block: usize,
        is_directory: bool,
    ) -> Result<()> {
        if self.check(required, target_block, is_directory)? {
            Ok(())
        } else {
            warn!(
                "denied {} on block {} ({})",
                required,
                target_block,
                if is_directory { "directory" } else { "file" }
            );
            Err(FileSystemError::PermissionDenied)
        }
    }
}
