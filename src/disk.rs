use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

pub const BLOCK_SIZE: usize = 4096;

/// The allocation table occupies a single block of 16-bit entries, which caps
/// the number of blocks a volume can address.
pub const MAX_BLOCKS: usize = BLOCK_SIZE / 2;

/// Root directory, allocation table and at least one data block.
pub const MIN_BLOCKS: usize = 3;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("failed to open disk image: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to read disk image: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write disk image: {0}")]
    Write(#[source] std::io::Error),
    #[error("block {block} is outside the volume")]
    OutOfRange { block: usize },
    #[error("a volume must have between {} and {} blocks, got {blocks}", MIN_BLOCKS, MAX_BLOCKS)]
    Geometry { blocks: usize },
}

pub trait Disk
where
    Self: Sized,
{
    fn open<P: AsRef<Path>>(path: P, num_blocks: usize) -> Result<Self, DiskError>;

    fn size(&self) -> usize;

    fn mounted(&self) -> bool;
    fn mount(&mut self) -> Result<(), DiskError>;
    fn unmount(&mut self) -> Result<(), DiskError>;

    fn read(&mut self, block_number: usize) -> Result<Vec<u8>, DiskError>;
    fn write(&mut self, block_number: usize, data: &[u8]) -> Result<(), DiskError>;
}

#[derive(Debug)]
pub struct BlockDisk {
    file_handle: File,
    num_blocks: usize,
    num_reads: u128,
    num_writes: u128,
    mounted: bool,
    num_mounts: u128,
}

impl BlockDisk {
    pub fn reads(&self) -> u128 {
        self.num_reads
    }

    pub fn writes(&self) -> u128 {
        self.num_writes
    }

    pub fn mounts(&self) -> u128 {
        self.num_mounts
    }

    fn seek_to(&mut self, block_number: usize) -> std::io::Result<u64> {
        self.file_handle
            .seek(SeekFrom::Start((block_number * BLOCK_SIZE) as u64))
    }

    fn check_range(&self, block_number: usize) -> Result<(), DiskError> {
        if block_number >= self.num_blocks {
            return Err(DiskError::OutOfRange {
                block: block_number,
            });
        }
        Ok(())
    }
}

impl Disk for BlockDisk {
    fn open<P: AsRef<Path>>(path: P, num_blocks: usize) -> Result<Self, DiskError> {
        if !(MIN_BLOCKS..=MAX_BLOCKS).contains(&num_blocks) {
            return Err(DiskError::Geometry { blocks: num_blocks });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())
            .map_err(DiskError::Open)?;

        let image_len = (num_blocks * BLOCK_SIZE) as u64;
        let current_len = file.metadata().map_err(DiskError::Open)?.len();
        if current_len < image_len {
            file.set_len(image_len).map_err(DiskError::Open)?;
        }
        debug!(
            "opened image {} with {} blocks",
            path.as_ref().display(),
            num_blocks
        );

        Ok(BlockDisk {
            file_handle: file,
            num_blocks,
            num_reads: 0,
            num_writes: 0,
            mounted: false,
            num_mounts: 0,
        })
    }

    fn size(&self) -> usize {
        self.num_blocks
    }

    fn mounted(&self) -> bool {
        self.mounted
    }

    fn mount(&mut self) -> Result<(), DiskError> {
        self.num_mounts += 1;
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), DiskError> {
        self.file_handle.sync_all().map_err(DiskError::Write)?;
        self.mounted = false;
        Ok(())
    }

    fn read(&mut self, block_number: usize) -> Result<Vec<u8>, DiskError> {
        self.check_range(block_number)?;
        self.seek_to(block_number).map_err(DiskError::Read)?;

        let mut data: Vec<u8> = vec![0; BLOCK_SIZE];
        self.file_handle
            .read_exact(&mut data)
            .map_err(DiskError::Read)?;

        self.num_reads += 1;
        Ok(data)
    }

    fn write(&mut self, block_number: usize, data: &[u8]) -> Result<(), DiskError> {
        self.check_range(block_number)?;
        self.seek_to(block_number).map_err(DiskError::Write)?;

        let mut write_data = data.to_vec();
        write_data.truncate(BLOCK_SIZE);
        write_data.resize(BLOCK_SIZE, 0);

        self.file_handle
            .write_all(&write_data)
            .map_err(DiskError::Write)?;

        self.num_writes += 1;
        Ok(())
    }
}
