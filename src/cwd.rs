use crate::dir::{DirBlock, PARENT_NAME, SELF_NAME};
use crate::disk::Disk;
use crate::error::{FileSystemError, Result};
use crate::fat::ROOT_BLOCK;
use log::debug;

/// Splits a path at its last `/` into the containing directory and the leaf name.
///
/// A path without `/` has no directory part and is relative to the working
/// directory; `/name` lives in the root.
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    match path.rfind('/') {
        None => (None, path),
        Some(0) => (Some("/"), &path[1..]),
        Some(i) => (Some(&path[..i]), &path[i + 1..]),
    }
}

/// The single open directory shared by every operation.
///
/// `entries` caches the directory block `loaded`. Between operations the
/// loaded block is always the working directory `current`; anything that
/// opens another directory goes through [`WorkingDirectory::scoped`] or
/// restores it itself.
#[derive(Debug)]
pub struct WorkingDirectory {
    current: usize,
    loaded: usize,
    entries: DirBlock,
    dirty: bool,
}

impl WorkingDirectory {
    pub fn mount<D: Disk>(disk: &mut D) -> Result<Self> {
        Ok(WorkingDirectory {
            current: ROOT_BLOCK,
            loaded: ROOT_BLOCK,
            entries: DirBlock::load(disk, ROOT_BLOCK)?,
            dirty: false,
        })
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn loaded(&self) -> usize {
        self.loaded
    }

    pub fn entries(&self) -> &DirBlock {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut DirBlock {
        self.dirty = true;
        &mut self.entries
    }

    /// Writes the cached entries back to their block.
    pub fn persist<D: Disk>(&mut self, disk: &mut D) -> Result<()> {
        self.entries.store(disk, self.loaded)?;
        self.dirty = false;
        Ok(())
    }

    fn flush<D: Disk>(&mut self, disk: &mut D) -> Result<()> {
        if self.dirty {
            self.persist(disk)?;
        }
        Ok(())
    }

    /// Flushes the cache and loads `block` into it.
    pub fn open<D: Disk>(&mut self, disk: &mut D, block: usize) -> Result<()> {
        self.flush(disk)?;
        self.entries = DirBlock::load(disk, block)?;
        self.loaded = block;
        Ok(())
    }

    /// Replaces the root with an empty directory and makes it the working directory.
    pub fn reset<D: Disk>(&mut self, disk: &mut D) -> Result<()> {
        self.entries = DirBlock::default();
        self.loaded = ROOT_BLOCK;
        self.current = ROOT_BLOCK;
        self.persist(disk)
    }

    /// Runs `f` and then reloads whichever directory was loaded before, even
    /// when `f` fails. An error from `f` wins over one from the reload.
    pub fn scoped<D, T, F>(&mut self, disk: &mut D, f: F) -> Result<T>
    where
        D: Disk,
        F: FnOnce(&mut Self, &mut D) -> Result<T>,
    {
        let saved = self.loaded;
        let result = f(self, disk);
        let restored = self.open(disk, saved);
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Walks `path` one directory at a time and returns the final block.
    ///
    /// Absolute paths start at the root, relative ones at whatever is loaded.
    /// On failure the cache keeps the last directory reached; callers that
    /// need their directory back must reopen it.
    pub fn resolve<D: Disk>(&mut self, disk: &mut D, path: &str) -> Result<usize> {
        if path.starts_with('/') {
            self.open(disk, ROOT_BLOCK)?;
        }

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = match segment {
                SELF_NAME => continue,
                PARENT_NAME => self.entries.parent().unwrap_or(ROOT_BLOCK),
                name => match self.entries.find(name) {
                    Some((_, entry)) if entry.is_dir() => entry.first_block,
                    Some(_) => {
                        return Err(FileSystemError::NotADirectory {
                            name: name.to_string(),
                        })
                    }
                    None => {
                        return Err(FileSystemError::NotFound {
                            path: path.to_string(),
                        })
                    }
                },
            };
            self.open(disk, next)?;
        }

        debug!("resolved '{}' to block {}", path, self.loaded);
        Ok(self.loaded)
    }

    /// Makes `path` the working directory. On failure the working directory
    /// is left as it was.
    pub fn change_directory<D: Disk>(&mut self, disk: &mut D, path: &str) -> Result<()> {
        match self.resolve(disk, path) {
            Ok(block) => {
                self.current = block;
                Ok(())
            }
            Err(e) => {
                let current = self.current;
                self.open(disk, current)?;
                Err(e)
            }
        }
    }

    /// Path from the root to the working directory, rebuilt by climbing the
    /// `..` links and looking each directory up in its parent.
    pub fn absolute_path<D: Disk>(&mut self, disk: &mut D) -> Result<String> {
        let start = self.current;
        let names = self.scoped(disk, |cwd, disk| {
            cwd.open(disk, start)?;
            let mut names = Vec::new();
            let mut visited = start;
            while visited != ROOT_BLOCK {
                let parent = cwd
                    .entries
                    .parent()
                    .ok_or(FileSystemError::Corrupted { block: visited })?;
                cwd.open(disk, parent)?;
                let entry = cwd
                    .entries
                    .find_by_block(visited)
                    .ok_or(FileSystemError::Corrupted { block: visited })?;
                names.push(entry.name.clone());
                visited = parent;
            }
            Ok(names)
        })?;

        if names.is_empty() {
            return Ok("/".to_string());
        }
        Ok(names.iter().rev().map(|n| format!("/{}", n)).collect())
    }

    /// Climbs back to the root, flushing every directory on the way.
    pub fn unmount<D: Disk>(&mut self, disk: &mut D) -> Result<()> {
        let current = self.current;
        self.open(disk, current)?;
        while self.loaded != ROOT_BLOCK {
            let parent = self.entries.parent().unwrap_or(ROOT_BLOCK);
            self.open(disk, parent)?;
        }
        self.current = ROOT_BLOCK;
        self.persist(disk)
    }
}
