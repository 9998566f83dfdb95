use crate::access::AccessRights;
use crate::disk::{Disk, BLOCK_SIZE};
use crate::error::{FileSystemError, Result};
use serde::{Deserialize, Serialize};

const DIR_NAME_LEN: usize = 56;
const DIR_RECORD_LEN: usize = 8;
pub const DIR_ENTRY_SIZE: usize = DIR_NAME_LEN + DIR_RECORD_LEN;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// Longest name that still leaves room for the terminating NUL.
pub const MAX_NAME_LEN: usize = DIR_NAME_LEN - 1;

pub const PARENT_NAME: &str = "..";
pub const SELF_NAME: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub first_block: usize,
    pub kind: EntryKind,
    pub rights: AccessRights,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_parent_link(&self) -> bool {
        self.name == PARENT_NAME
    }
}

// Fixed-width tail of every entry, after the name bytes.
#[derive(Serialize, Deserialize)]
struct EntryRecord {
    size: u32,
    first_blk: u16,
    kind: u8,
    access_rights: u8,
}

/// Rejects names that cannot be stored as a leaf entry.
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == SELF_NAME
        || name == PARENT_NAME
        || name.contains(['/', '\0'])
    {
        return Err(FileSystemError::InvalidPath {
            path: name.to_string(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FileSystemError::NameTooLong {
            name: name.to_string(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// The entry array held by one directory block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    slots: Vec<Option<DirEntry>>,
}

impl Default for DirBlock {
    fn default() -> Self {
        DirBlock {
            slots: vec![None; ENTRIES_PER_BLOCK],
        }
    }
}

impl DirBlock {
    /// A fresh subdirectory: only slot 0 is used, as the link back to `parent_block`.
    pub fn make_child(parent_block: usize, rights: AccessRights) -> Self {
        let mut dir = DirBlock::default();
        dir.slots[0] = Some(DirEntry {
            name: PARENT_NAME.to_string(),
            size: 0,
            first_block: parent_block,
            kind: EntryKind::Directory,
            rights,
        });
        dir
    }

    pub fn load<D: Disk>(disk: &mut D, block: usize) -> Result<Self> {
        let data = disk.read(block)?;
        DirBlock::decode(&data)
    }

    pub fn store<D: Disk>(&self, disk: &mut D, block: usize) -> Result<()> {
        disk.write(block, &self.encode()?)?;
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut slots = Vec::with_capacity(ENTRIES_PER_BLOCK);
        for raw in data.chunks_exact(DIR_ENTRY_SIZE).take(ENTRIES_PER_BLOCK) {
            let name_bytes = &raw[..DIR_NAME_LEN];
            let end = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(DIR_NAME_LEN);
            if end == 0 {
                slots.push(None);
                continue;
            }

            let record: EntryRecord = bincode::deserialize(&raw[DIR_NAME_LEN..])?;
            slots.push(Some(DirEntry {
                name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
                size: record.size,
                first_block: record.first_blk as usize,
                kind: if record.kind == 1 {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                rights: AccessRights::from_bits_retain(record.access_rights),
            }));
        }
        slots.resize(ENTRIES_PER_BLOCK, None);
        Ok(DirBlock { slots })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut block = vec![0u8; BLOCK_SIZE];
        for (i, slot) in self.slots.iter().enumerate() {
            let entry = match slot {
                Some(entry) => entry,
                None => continue,
            };
            let off = i * DIR_ENTRY_SIZE;
            let name = entry.name.as_bytes();
            let len = std::cmp::min(name.len(), MAX_NAME_LEN);
            block[off..off + len].copy_from_slice(&name[..len]);

            let record = bincode::serialize(&EntryRecord {
                size: entry.size,
                first_blk: entry.first_block as u16,
                kind: match entry.kind {
                    EntryKind::File => 0,
                    EntryKind::Directory => 1,
                },
                access_rights: entry.rights.bits(),
            })?;
            block[off + DIR_NAME_LEN..off + DIR_NAME_LEN + record.len()].copy_from_slice(&record);
        }
        Ok(block)
    }

    /// Block of the parent directory, if this is not the root.
    pub fn parent(&self) -> Option<usize> {
        match &self.slots[0] {
            Some(entry) if entry.is_parent_link() => Some(entry.first_block),
            _ => None,
        }
    }

    pub fn get(&self, slot: usize) -> Option<&DirEntry> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut DirEntry> {
        self.slots.get_mut(slot).and_then(|s| s.as_mut())
    }

    /// Slot and entry for `name`; ".." is only found in subdirectories.
    pub fn find(&self, name: &str) -> Option<(usize, &DirEntry)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.as_ref().filter(|e| e.name == name).map(|e| (i, e)))
    }

    /// The child entry whose chain starts at `block`.
    pub fn find_by_block(&self, block: usize) -> Option<&DirEntry> {
        self.children().find(|e| e.first_block == block)
    }

    /// Every used slot except the link to the parent.
    pub fn children(&self) -> impl Iterator<Item = &DirEntry> {
        self.slots
            .iter()
            .flatten()
            .filter(|e| !e.is_parent_link())
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    pub fn insert(&mut self, entry: DirEntry) -> Result<usize> {
        let slot = self.free_slot().ok_or(FileSystemError::DirectoryFull)?;
        self.slots[slot] = Some(entry);
        Ok(slot)
    }

    pub fn put(&mut self, slot: usize, entry: DirEntry) {
        self.slots[slot] = Some(entry);
    }

    pub fn take(&mut self, slot: usize) -> Option<DirEntry> {
        self.slots.get_mut(slot).and_then(|s| s.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, first_block: usize, size: u32) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            size,
            first_block,
            kind: EntryKind::File,
            rights: AccessRights::READ | AccessRights::WRITE,
        }
    }

    #[test]
    fn entry_layout_is_64_bytes() {
        assert_eq!(DIR_ENTRY_SIZE, 64);
        assert_eq!(ENTRIES_PER_BLOCK, 64);
        assert_eq!(MAX_NAME_LEN, 55);
    }

    #[test]
    fn encoded_record_is_little_endian() {
        let mut dir = DirBlock::default();
        dir.insert(file("a", 0x0203, 0x01020304)).unwrap();
        let block = dir.encode().unwrap();

        assert_eq!(block[0], b'a');
        assert_eq!(&block[56..60], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&block[60..62], &[0x03, 0x02]);
        assert_eq!(block[62], 0);
        assert_eq!(block[63], 0x06);
    }

    #[test]
    fn decode_restores_entries_and_gaps() {
        let mut dir = DirBlock::make_child(7, AccessRights::all());
        dir.insert(file("notes.txt", 12, 5000)).unwrap();
        dir.put(5, file("late", 13, 1));

        let decoded = DirBlock::decode(&dir.encode().unwrap()).unwrap();
        assert_eq!(decoded, dir);
        assert_eq!(decoded.parent(), Some(7));
        assert!(decoded.get(2).is_none());
        assert_eq!(decoded.get(5).unwrap().name, "late");
    }

    #[test]
    fn root_has_no_parent_link() {
        let root = DirBlock::default();
        assert_eq!(root.parent(), None);
        assert_eq!(root.find(PARENT_NAME), None);
        assert_eq!(root.free_slot(), Some(0));
    }

    #[test]
    fn child_keeps_slot_zero_for_parent() {
        let mut dir = DirBlock::make_child(0, AccessRights::all());
        assert_eq!(dir.insert(file("x", 3, 1)).unwrap(), 1);
        assert_eq!(dir.children().count(), 1);
        assert_eq!(dir.find_by_block(0), None);
        assert_eq!(dir.find_by_block(3).unwrap().name, "x");
    }

    #[test]
    fn full_directory_rejects_insert() {
        let mut dir = DirBlock::default();
        for i in 0..ENTRIES_PER_BLOCK {
            dir.insert(file(&format!("f{}", i), i + 2, 0)).unwrap();
        }
        assert!(matches!(
            dir.insert(file("one-more", 99, 0)),
            Err(FileSystemError::DirectoryFull)
        ));
    }

    #[test]
    fn names_are_validated() {
        assert!(check_name("ok").is_ok());
        assert!(check_name(&"n".repeat(MAX_NAME_LEN)).is_ok());
        assert!(matches!(
            check_name(&"n".repeat(MAX_NAME_LEN + 1)),
            Err(FileSystemError::NameTooLong { max: 55, .. })
        ));
        assert!(matches!(
            check_name(".."),
            Err(FileSystemError::InvalidPath { .. })
        ));
        assert!(matches!(
            check_name(""),
            Err(FileSystemError::InvalidPath { .. })
        ));
        assert!(matches!(
            check_name("a\0b"),
            Err(FileSystemError::InvalidPath { .. })
        ));
    }
}
