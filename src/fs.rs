use crate::access::AccessRights;
use crate::cwd::{split_path, WorkingDirectory};
use crate::dir::{check_name, DirBlock, DirEntry, EntryKind, PARENT_NAME, SELF_NAME};
use crate::disk::{Disk, BLOCK_SIZE};
use crate::error::{FileSystemError, Result};
use crate::fat::{AllocationTable, ROOT_BLOCK};
use log::{debug, info, warn};

pub trait FileSystem<D: Disk>
where
    Self: Sized,
{
    fn mount(disk: D) -> Result<Self>;
    fn unmount(self) -> Result<D>;

    fn format(&mut self) -> Result<()>;

    fn create(&mut self, path: &str, content: &[u8]) -> Result<()>;
    fn read(&mut self, path: &str) -> Result<Vec<u8>>;
    fn copy(&mut self, source: &str, dest: &str) -> Result<()>;
    fn rename(&mut self, source: &str, dest: &str) -> Result<()>;
    fn remove(&mut self, path: &str) -> Result<()>;
    fn append(&mut self, source: &str, dest: &str) -> Result<()>;

    fn mkdir(&mut self, path: &str) -> Result<()>;
    fn cd(&mut self, path: &str) -> Result<()>;
    fn pwd(&mut self) -> Result<String>;
    fn chmod(&mut self, rights: &str, path: &str) -> Result<()>;
    fn ls(&self) -> Vec<DirEntry>;
}

/// Hierarchical filesystem over a block disk: block 0 holds the root
/// directory, block 1 the allocation table, everything else is data.
pub struct FatFileSystem<D: Disk> {
    pub(crate) disk: D,
    pub(crate) fat: AllocationTable,
    pub(crate) cwd: WorkingDirectory,
}

impl<D: Disk> FileSystem<D> for FatFileSystem<D> {
    fn mount(mut disk: D) -> Result<Self> {
        disk.mount()?;
        let fat = AllocationTable::load(&mut disk)?;
        let cwd = WorkingDirectory::mount(&mut disk)?;
        if fat.is_formatted() {
            info!("mounted volume with {} blocks", disk.size());
        } else {
            warn!("mounted volume is not formatted");
        }
        Ok(FatFileSystem { disk, fat, cwd })
    }

    fn unmount(mut self) -> Result<D> {
        self.cwd.unmount(&mut self.disk)?;
        self.fat.persist(&mut self.disk)?;
        self.disk.unmount()?;
        info!("unmounted volume");
        Ok(self.disk)
    }

    fn format(&mut self) -> Result<()> {
        self.fat.reset();
        self.fat.persist(&mut self.disk)?;
        self.cwd.reset(&mut self.disk)?;
        info!("formatted volume: {} free blocks", self.fat.free_count());
        Ok(())
    }

    fn create(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let (dir, name) = split_path(path);
        check_name(name)?;

        self.within(dir, |fs| {
            let target = fs.cwd.loaded();
            fs.authorize(AccessRights::WRITE, target, true)?;
            fs.add_file(name, content)
        })
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let (_, entry) = self.local_entry(path)?;
        if entry.is_dir() {
            return Err(FileSystemError::IsADirectory { name: entry.name });
        }
        self.authorize(AccessRights::READ, entry.first_block, false)?;

        let mut data = Vec::with_capacity(entry.size as usize);
        for block in self.fat.chain(&mut self.disk, entry.first_block) {
            data.extend_from_slice(&block?);
        }
        data.truncate(entry.size as usize);
        Ok(data)
    }

    fn copy(&mut self, source: &str, dest: &str) -> Result<()> {
        let content = self.read(source)?;
        let (_, entry) = self.local_entry(source)?;

        self.within(None, |fs| {
            let name = fs.enter_destination(dest, &entry.name)?;
            let target = fs.cwd.loaded();
            fs.authorize(AccessRights::WRITE, target, true)?;
            fs.add_file(&name, &content)
        })
    }

    fn rename(&mut self, source: &str, dest: &str) -> Result<()> {
        let (slot, entry) = self.local_entry(source)?;
        let origin = self.cwd.current();
        self.authorize(AccessRights::WRITE, origin, true)?;
        if entry.is_dir() {
            self.within(None, |fs| {
                fs.enter_destination(dest, &entry.name)?;
                let target = fs.cwd.loaded();
                fs.ensure_outside(target, entry.first_block, dest)
            })?;
        }

        self.cwd.entries_mut().take(slot);
        self.cwd.persist(&mut self.disk)?;

        let placed = self.within(None, |fs| {
            let name = fs.enter_destination(dest, &entry.name)?;
            let target = fs.cwd.loaded();
            fs.authorize(AccessRights::WRITE, target, true)?;
            if fs.cwd.entries().find(&name).is_some() {
                return Err(FileSystemError::NameCollision { name });
            }

            let mut moved = entry.clone();
            moved.name = name;
            fs.cwd.entries_mut().insert(moved)?;
            fs.cwd.persist(&mut fs.disk)?;
            Ok(target)
        });

        match placed {
            Ok(target) => {
                if entry.is_dir() && target != origin {
                    self.relink_parent(entry.first_block, target)?;
                }
                debug!("moved '{}' to '{}'", source, dest);
                Ok(())
            }
            Err(e) => {
                self.cwd.entries_mut().put(slot, entry);
                self.cwd.persist(&mut self.disk)?;
                Err(e)
            }
        }
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        let (slot, entry) = self.local_entry(path)?;
        let current = self.cwd.current();
        self.authorize(AccessRights::WRITE, current, true)?;

        if entry.is_dir() {
            let empty = self.cwd.scoped(&mut self.disk, |cwd, disk| {
                cwd.open(disk, entry.first_block)?;
                Ok(cwd.entries().children().next().is_none())
            })?;
            if !empty {
                return Err(FileSystemError::DirectoryNotEmpty { name: entry.name });
            }
        }

        self.fat.free_chain(&mut self.disk, entry.first_block)?;
        self.cwd.entries_mut().take(slot);
        self.cwd.persist(&mut self.disk)?;
        debug!("removed '{}'", entry.name);
        Ok(())
    }

    fn append(&mut self, source: &str, dest: &str) -> Result<()> {
        let content = self.read(source)?;
        let (slot, entry) = self.local_entry(dest)?;
        if entry.is_dir() {
            return Err(FileSystemError::IsADirectory { name: entry.name });
        }
        let current = self.cwd.current();
        self.authorize(AccessRights::WRITE, current, true)?;

        if content.is_empty() {
            return Ok(());
        }
        let new_size = u32::try_from(entry.size as usize + content.len())
            .map_err(|_| FileSystemError::NoSpace)?;

        let blocks = self.fat.blocks(entry.first_block)?;
        let last = *blocks.last().ok_or(FileSystemError::Corrupted {
            block: entry.first_block,
        })?;

        // Top up the slack of the last block before chaining new blocks.
        let used = std::cmp::min(
            (entry.size as usize).saturating_sub((blocks.len() - 1) * BLOCK_SIZE),
            BLOCK_SIZE,
        );
        let fill = std::cmp::min(BLOCK_SIZE - used, content.len());
        if fill > 0 {
            let mut block = self.disk.read(last)?;
            block[used..used + fill].copy_from_slice(&content[..fill]);
            self.disk.write(last, &block)?;
        }

        let rest = &content[fill..];
        if !rest.is_empty() {
            let head = self.fat.write_chunk_chain(&mut self.disk, rest)?;
            self.fat.link_to(last, head);
            self.fat.persist(&mut self.disk)?;
        }

        if let Some(target) = self.cwd.entries_mut().get_mut(slot) {
            target.size = new_size;
        }
        self.cwd.persist(&mut self.disk)
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let (dir, name) = split_path(path);
        check_name(name)?;

        self.within(dir, |fs| {
            let parent = fs.cwd.loaded();
            fs.authorize(AccessRights::WRITE, parent, true)?;
            fs.ensure_vacant(name)?;

            let block = fs.fat.allocate_block()?;
            fs.fat.persist(&mut fs.disk)?;
            DirBlock::make_child(parent, AccessRights::DIR_DEFAULT).store(&mut fs.disk, block)?;

            fs.cwd.entries_mut().insert(DirEntry {
                name: name.to_string(),
                size: 0,
                first_block: block,
                kind: EntryKind::Directory,
                rights: AccessRights::DIR_DEFAULT,
            })?;
            fs.cwd.persist(&mut fs.disk)?;
            debug!("created directory '{}' in block {}", name, block);
            Ok(())
        })
    }

    fn cd(&mut self, path: &str) -> Result<()> {
        self.cwd.change_directory(&mut self.disk, path)
    }

    fn pwd(&mut self) -> Result<String> {
        self.cwd.absolute_path(&mut self.disk)
    }

    fn chmod(&mut self, rights: &str, path: &str) -> Result<()> {
        let literal = || FileSystemError::ParseError {
            literal: rights.to_string(),
        };
        let bits: u8 = rights.trim().parse().map_err(|_| literal())?;
        let rights = AccessRights::from_bits(bits).ok_or_else(literal)?;

        let (slot, _) = self.local_entry(path)?;
        if let Some(entry) = self.cwd.entries_mut().get_mut(slot) {
            entry.rights = rights;
        }
        self.cwd.persist(&mut self.disk)
    }

    fn ls(&self) -> Vec<DirEntry> {
        self.cwd.entries().children().cloned().collect()
    }
}

impl<D: Disk> FatFileSystem<D> {
    pub fn is_formatted(&self) -> bool {
        self.fat.is_formatted()
    }

    pub fn free_blocks(&self) -> usize {
        self.fat.free_count()
    }

    pub fn table(&self) -> &AllocationTable {
        &self.fat
    }

    /// Entry for a name in the working directory.
    pub fn stat(&mut self, path: &str) -> Result<DirEntry> {
        self.local_entry(path).map(|(_, entry)| entry)
    }

    /// Runs `f` with the directory `dir` loaded (the working directory when
    /// `None`) and reloads the previously loaded directory afterwards.
    fn within<T, F>(&mut self, dir: Option<&str>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved = self.cwd.loaded();
        let result = match dir {
            Some(dir) => match self.cwd.resolve(&mut self.disk, dir) {
                Ok(_) => f(self),
                Err(e) => Err(e),
            },
            None => f(self),
        };
        let restored = self.cwd.open(&mut self.disk, saved);
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Finds `path` in the working directory only. A directory prefix is
    /// accepted when it names the working directory itself.
    fn local_entry(&mut self, path: &str) -> Result<(usize, DirEntry)> {
        let (dir, leaf) = split_path(path);
        if let Some(dir) = dir {
            let current = self.cwd.current();
            let resolved = self
                .cwd
                .scoped(&mut self.disk, |cwd, disk| cwd.resolve(disk, dir))?;
            if resolved != current {
                return Err(FileSystemError::NotFound {
                    path: path.to_string(),
                });
            }
        }

        self.cwd
            .entries()
            .find(leaf)
            .filter(|(_, entry)| !entry.is_parent_link())
            .map(|(slot, entry)| (slot, entry.clone()))
            .ok_or_else(|| FileSystemError::NotFound {
                path: path.to_string(),
            })
    }

    /// Loads the directory a copy or move of `source_name` to `dest` lands in
    /// and returns the name it gets there. An existing directory as the last
    /// component receives the entry under its original name.
    fn enter_destination(&mut self, dest: &str, source_name: &str) -> Result<String> {
        let (dir, leaf) = split_path(dest);
        if leaf.is_empty() || leaf == SELF_NAME || leaf == PARENT_NAME {
            self.cwd.resolve(&mut self.disk, dest)?;
            return Ok(source_name.to_string());
        }
        if let Some(dir) = dir {
            self.cwd.resolve(&mut self.disk, dir)?;
        }

        let existing_dir = match self.cwd.entries().find(leaf) {
            Some((_, entry)) if entry.is_dir() => Some(entry.first_block),
            _ => None,
        };
        match existing_dir {
            Some(block) => {
                self.cwd.open(&mut self.disk, block)?;
                Ok(source_name.to_string())
            }
            None => {
                check_name(leaf)?;
                Ok(leaf.to_string())
            }
        }
    }

    fn ensure_vacant(&self, name: &str) -> Result<()> {
        let entries = self.cwd.entries();
        if entries.find(name).is_some() {
            warn!("'{}' already exists", name);
            return Err(FileSystemError::NameCollision {
                name: name.to_string(),
            });
        }
        if entries.free_slot().is_none() {
            return Err(FileSystemError::DirectoryFull);
        }
        Ok(())
    }

    /// Stores `content` as a new file in the loaded directory.
    fn add_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        self.ensure_vacant(name)?;
        let size = u32::try_from(content.len()).map_err(|_| FileSystemError::NoSpace)?;

        let first_block = self.fat.write_chunk_chain(&mut self.disk, content)?;
        self.cwd.entries_mut().insert(DirEntry {
            name: name.to_string(),
            size,
            first_block,
            kind: EntryKind::File,
            rights: AccessRights::FILE_DEFAULT,
        })?;
        self.cwd.persist(&mut self.disk)?;
        debug!("created '{}' ({} bytes) at block {}", name, size, first_block);
        Ok(())
    }

    /// Fails if `dir` is `moved` or lies below it.
    fn ensure_outside(&mut self, dir: usize, moved: usize, dest: &str) -> Result<()> {
        let limit = self.fat.len();
        self.cwd.scoped(&mut self.disk, |cwd, disk| {
            let mut block = dir;
            for _ in 0..limit {
                if block == moved {
                    return Err(FileSystemError::InvalidPath {
                        path: dest.to_string(),
                    });
                }
                if block == ROOT_BLOCK {
                    return Ok(());
                }
                cwd.open(disk, block)?;
                block = cwd.entries().parent().unwrap_or(ROOT_BLOCK);
            }
            Err(FileSystemError::Corrupted { block })
        })
    }

    /// Points the `..` slot of directory `dir` at `parent`.
    fn relink_parent(&mut self, dir: usize, parent: usize) -> Result<()> {
        self.cwd.scoped(&mut self.disk, |cwd, disk| {
            cwd.open(disk, dir)?;
            if let Some(link) = cwd.entries_mut().get_mut(0) {
                link.first_block = parent;
            }
            cwd.persist(disk)
        })
    }
}
