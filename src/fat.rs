use crate::disk::{Disk, DiskError, BLOCK_SIZE, MAX_BLOCKS, MIN_BLOCKS};
use crate::error::{FileSystemError, Result};
use log::{debug, warn};
use math::round;

pub const FREE: i16 = 0;
pub const EOF: i16 = -1;
pub const RESERVED: i16 = -2;

pub const ROOT_BLOCK: usize = 0;
pub const FAT_BLOCK: usize = 1;

/// Decoded meaning of one table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Free,
    Eof,
    Reserved,
    Next(usize),
}

impl From<i16> for Link {
    fn from(raw: i16) -> Self {
        match raw {
            FREE => Link::Free,
            EOF => Link::Eof,
            RESERVED => Link::Reserved,
            next => Link::Next(next as u16 as usize),
        }
    }
}

/// In-memory copy of the allocation table stored in block 1.
///
/// Entry `i` describes block `i`: free, reserved, the last block of its chain,
/// or the index of the next block in the chain.
#[derive(Debug, Clone)]
pub struct AllocationTable {
    entries: Vec<i16>,
}

impl AllocationTable {
    pub fn load<D: Disk>(disk: &mut D) -> Result<Self> {
        let blocks = disk.size();
        if !(MIN_BLOCKS..=MAX_BLOCKS).contains(&blocks) {
            return Err(DiskError::Geometry { blocks }.into());
        }
        let mut block = disk.read(FAT_BLOCK)?;
        block.resize(BLOCK_SIZE, 0);
        let entries = (0..blocks)
            .map(|i| i16::from_le_bytes([block[2 * i], block[2 * i + 1]]))
            .collect();
        Ok(AllocationTable { entries })
    }

    pub fn persist<D: Disk>(&self, disk: &mut D) -> Result<()> {
        let mut block = vec![0u8; BLOCK_SIZE];
        for (i, entry) in self.entries.iter().enumerate() {
            block[2 * i..2 * i + 2].copy_from_slice(&entry.to_le_bytes());
        }
        disk.write(FAT_BLOCK, &block)?;
        Ok(())
    }

    /// Marks every block free except the root directory and the table itself.
    pub fn reset(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = FREE);
        self.entries[ROOT_BLOCK] = RESERVED;
        self.entries[FAT_BLOCK] = RESERVED;
    }

    pub fn is_formatted(&self) -> bool {
        self.entries[ROOT_BLOCK] == RESERVED && self.entries[FAT_BLOCK] == RESERVED
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn link(&self, block: usize) -> Link {
        Link::from(self.entries[block])
    }

    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|&&e| e == FREE).count()
    }

    pub fn find_free_block(&self) -> Option<usize> {
        self.entries.iter().position(|&e| e == FREE)
    }

    /// Claims a free block as a one-block chain. The caller persists the table.
    pub fn allocate_block(&mut self) -> Result<usize> {
        let block = self.find_free_block().ok_or_else(|| {
            warn!("allocation failed: no free block");
            FileSystemError::NoSpace
        })?;
        self.entries[block] = EOF;
        debug!("allocated block {}", block);
        Ok(block)
    }

    /// Links the end of one chain to the head of another.
    pub fn link_to(&mut self, tail: usize, head: usize) {
        self.entries[tail] = head as i16;
    }

    /// Writes `data` into a fresh chain and returns its head block.
    ///
    /// Empty data still occupies one zero-filled block. The table is persisted
    /// after every block; a failure part way leaves the written blocks allocated.
    pub fn write_chunk_chain<D: Disk>(&mut self, disk: &mut D, data: &[u8]) -> Result<usize> {
        let chunks = round::ceil(data.len() as f64 / BLOCK_SIZE as f64, 0) as usize;

        let mut head = None;
        let mut prev: Option<usize> = None;
        for i in 0..chunks.max(1) {
            let block = self.allocate_block()?;
            if let Some(p) = prev {
                self.link_to(p, block);
            }

            let start = i * BLOCK_SIZE;
            let end = std::cmp::min(start + BLOCK_SIZE, data.len());
            disk.write(block, &data[start..end])?;
            self.persist(disk)?;

            head.get_or_insert(block);
            prev = Some(block);
        }

        debug!(
            "wrote {} bytes as a {}-block chain",
            data.len(),
            chunks.max(1)
        );
        head.ok_or(FileSystemError::NoSpace)
    }

    /// Releases every block of the chain starting at `head`.
    pub fn free_chain<D: Disk>(&mut self, disk: &mut D, head: usize) -> Result<()> {
        let blocks = self.blocks(head)?;
        for &block in &blocks {
            self.entries[block] = FREE;
        }
        self.persist(disk)?;
        debug!("freed chain {:?}", blocks);
        Ok(())
    }

    /// Block indices of the chain starting at `head`, in order.
    pub fn blocks(&self, head: usize) -> Result<Vec<usize>> {
        let mut blocks = Vec::new();
        let mut next = Some(head);
        while let Some(block) = next {
            if blocks.len() >= self.len() {
                return Err(FileSystemError::Corrupted { block });
            }
            next = self.successor(block)?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Lazily reads the blocks of a chain. Each call starts over from `head`.
    pub fn chain<'a, D: Disk>(&'a self, disk: &'a mut D, head: usize) -> Chain<'a, D> {
        Chain {
            disk,
            table: self,
            next: Some(head),
            steps: 0,
        }
    }

    fn successor(&self, block: usize) -> Result<Option<usize>> {
        if block <= FAT_BLOCK || block >= self.len() {
            return Err(FileSystemError::Corrupted { block });
        }
        match self.link(block) {
            Link::Eof => Ok(None),
            Link::Next(next) if next > FAT_BLOCK && next < self.len() => Ok(Some(next)),
            _ => Err(FileSystemError::Corrupted { block }),
        }
    }
}

pub struct Chain<'a, D: Disk> {
    disk: &'a mut D,
    table: &'a AllocationTable,
    next: Option<usize>,
    steps: usize,
}

impl<'a, D: Disk> Iterator for Chain<'a, D> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next.take()?;
        if self.steps >= self.table.len() {
            return Some(Err(FileSystemError::Corrupted { block }));
        }
        self.steps += 1;

        self.next = match self.table.successor(block) {
            Ok(next) => next,
            Err(e) => return Some(Err(e)),
        };
        Some(self.disk.read(block).map_err(FileSystemError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::BlockDisk;
    use tempfile::NamedTempFile;

    /// A volume that claims more blocks than one table block can describe.
    struct OversizedDisk;

    impl Disk for OversizedDisk {
        fn open<P: AsRef<std::path::Path>>(
            _path: P,
            _num_blocks: usize,
        ) -> std::result::Result<Self, DiskError> {
            Ok(OversizedDisk)
        }

        fn size(&self) -> usize {
            MAX_BLOCKS + 1
        }

        fn mounted(&self) -> bool {
            true
        }

        fn mount(&mut self) -> std::result::Result<(), DiskError> {
            Ok(())
        }

        fn unmount(&mut self) -> std::result::Result<(), DiskError> {
            Ok(())
        }

        fn read(&mut self, _block_number: usize) -> std::result::Result<Vec<u8>, DiskError> {
            Ok(vec![0; BLOCK_SIZE])
        }

        fn write(
            &mut self,
            _block_number: usize,
            _data: &[u8],
        ) -> std::result::Result<(), DiskError> {
            Ok(())
        }
    }

    fn formatted(blocks: usize) -> (NamedTempFile, BlockDisk, AllocationTable) {
        let image = NamedTempFile::new().unwrap();
        let mut disk = BlockDisk::open(image.path(), blocks).unwrap();
        let mut table = AllocationTable::load(&mut disk).unwrap();
        table.reset();
        table.persist(&mut disk).unwrap();
        (image, disk, table)
    }

    #[test]
    fn oversized_volumes_are_refused() {
        let mut disk = OversizedDisk::open("unused", 0).unwrap();
        assert!(matches!(
            AllocationTable::load(&mut disk),
            Err(FileSystemError::Disk(DiskError::Geometry { blocks })) if blocks == MAX_BLOCKS + 1
        ));
    }

    #[test]
    fn reserved_blocks_are_never_handed_out() {
        let (_image, _disk, mut table) = formatted(4);

        assert!(table.is_formatted());
        assert_eq!(table.find_free_block(), Some(2));
        assert_eq!(table.allocate_block().unwrap(), 2);
        assert_eq!(table.allocate_block().unwrap(), 3);
        assert!(matches!(
            table.allocate_block(),
            Err(FileSystemError::NoSpace)
        ));
        assert_eq!(table.link(ROOT_BLOCK), Link::Reserved);
        assert_eq!(table.link(FAT_BLOCK), Link::Reserved);
    }

    #[test]
    fn chain_spans_blocks_and_ends_in_eof() {
        let (_image, mut disk, mut table) = formatted(16);
        let data: Vec<u8> = (0..BLOCK_SIZE * 2 + 10).map(|i| (i % 251) as u8).collect();

        let head = table.write_chunk_chain(&mut disk, &data).unwrap();
        let blocks = table.blocks(head).unwrap();
        assert_eq!(blocks, vec![2, 3, 4]);
        assert_eq!(table.link(4), Link::Eof);

        let read: Vec<u8> = table
            .chain(&mut disk, head)
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .concat();
        assert_eq!(read.len(), 3 * BLOCK_SIZE);
        assert_eq!(&read[..data.len()], &data[..]);
    }

    #[test]
    fn chain_is_restartable() {
        let (_image, mut disk, mut table) = formatted(8);
        let head = table.write_chunk_chain(&mut disk, b"abc").unwrap();

        let first = table.chain(&mut disk, head).count();
        let second = table.chain(&mut disk, head).count();
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[test]
    fn empty_data_takes_one_block() {
        let (_image, mut disk, mut table) = formatted(8);
        let head = table.write_chunk_chain(&mut disk, &[]).unwrap();
        assert_eq!(table.blocks(head).unwrap(), vec![head]);
    }

    #[test]
    fn table_survives_reload() {
        let (_image, mut disk, mut table) = formatted(8);
        let head = table.write_chunk_chain(&mut disk, &[7; BLOCK_SIZE + 1]).unwrap();

        let reloaded = AllocationTable::load(&mut disk).unwrap();
        assert!(reloaded.is_formatted());
        assert_eq!(reloaded.blocks(head).unwrap(), table.blocks(head).unwrap());
    }

    #[test]
    fn freed_chain_is_reused() {
        let (_image, mut disk, mut table) = formatted(8);
        let free_before = table.free_count();
        let head = table.write_chunk_chain(&mut disk, &[1; BLOCK_SIZE * 2]).unwrap();
        assert_eq!(table.free_count(), free_before - 2);

        table.free_chain(&mut disk, head).unwrap();
        assert_eq!(table.free_count(), free_before);
        assert_eq!(table.link(head), Link::Free);
        assert_eq!(table.find_free_block(), Some(head));
    }

    #[test]
    fn free_chain_refuses_reserved_heads() {
        let (_image, mut disk, mut table) = formatted(8);

        assert!(matches!(
            table.free_chain(&mut disk, ROOT_BLOCK),
            Err(FileSystemError::Corrupted { block: 0 })
        ));
        assert!(matches!(
            table.free_chain(&mut disk, FAT_BLOCK),
            Err(FileSystemError::Corrupted { block: 1 })
        ));
        assert!(table.is_formatted());
    }

    #[test]
    fn disk_full_leaves_partial_chain_allocated() {
        let (_image, mut disk, mut table) = formatted(4);

        let result = table.write_chunk_chain(&mut disk, &[9; BLOCK_SIZE * 3]);
        assert!(matches!(result, Err(FileSystemError::NoSpace)));
        assert_eq!(table.free_count(), 0);
    }

    #[test]
    fn looping_chain_is_detected() {
        let (_image, _disk, mut table) = formatted(8);
        let a = table.allocate_block().unwrap();
        let b = table.allocate_block().unwrap();
        table.link_to(a, b);
        table.link_to(b, a);

        assert!(matches!(
            table.blocks(a),
            Err(FileSystemError::Corrupted { .. })
        ));
    }
}
