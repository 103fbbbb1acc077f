use super::config::{HtConfig, TREE_HEADER_SIZE};
use crate::error::{Result, StratumError};
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Fixed fields at the start of a tree file.
///
/// ```text
/// magic i32 | file version i32 | provider version u32 | block size i32
/// max children i32 | node count i32 | root seq i32 | start i64 | element count u64
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    pub magic: i32,
    pub file_version: i32,
    pub provider_version: u32,
    pub block_size: usize,
    pub max_children: usize,
    pub node_count: i32,
    pub root_seq: i32,
    pub start_time: i64,
    pub element_count: u64,
}

impl TreeHeader {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(TREE_HEADER_SIZE);
        buf.put_i32_le(self.magic);
        buf.put_i32_le(self.file_version);
        buf.put_u32_le(self.provider_version);
        buf.put_i32_le(self.block_size as i32);
        buf.put_i32_le(self.max_children as i32);
        buf.put_i32_le(self.node_count);
        buf.put_i32_le(self.root_seq);
        buf.put_i64_le(self.start_time);
        buf.put_u64_le(self.element_count);
        buf.resize(TREE_HEADER_SIZE, 0);
        buf
    }

    /// Read the header of `path` and check it was written with `magic`, `file_version`
    /// and `provider_version`.
    pub fn read(path: &Path, magic: i32, file_version: i32, provider_version: u32) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < TREE_HEADER_SIZE as u64 {
            return Err(StratumError::InvalidFormat(format!(
                "{} is too short to be a history file",
                path.display()
            )));
        }
        let mut block = vec![0u8; TREE_HEADER_SIZE];
        file.read_exact(&mut block)?;
        let mut buf = &block[..];

        if buf.get_i32_le() != magic {
            return Err(StratumError::InvalidFormat(format!(
                "{} is not a history file of the expected kind",
                path.display()
            )));
        }
        let version = buf.get_i32_le();
        if version != file_version {
            return Err(StratumError::InvalidFormat(format!(
                "history file version {} is not supported",
                version
            )));
        }
        let found = buf.get_u32_le();
        if found != provider_version {
            return Err(StratumError::ProviderVersionMismatch {
                expected: provider_version,
                found,
            });
        }
        let block_size = buf.get_i32_le();
        let max_children = buf.get_i32_le();
        let node_count = buf.get_i32_le();
        let root_seq = buf.get_i32_le();
        let start_time = buf.get_i64_le();
        let element_count = buf.get_u64_le();
        if block_size <= 0
            || max_children < 2
            || node_count <= 0
            || !(0..node_count).contains(&root_seq)
        {
            return Err(StratumError::InvalidFormat(
                "corrupted history file header".to_string(),
            ));
        }

        Ok(Self {
            magic,
            file_version,
            provider_version,
            block_size: block_size as usize,
            max_children: max_children as usize,
            node_count,
            root_seq,
            start_time,
            element_count,
        })
    }
}

/// Block-level access to a tree file.
pub struct HtIo {
    config: HtConfig,
    file: Mutex<Option<File>>,
}

impl HtIo {
    /// Create (or truncate) the file for a new tree.
    pub fn create(config: HtConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&config.path)?;
        Ok(Self {
            config,
            file: Mutex::new(Some(file)),
        })
    }

    /// Open an existing file read-only.
    pub fn open(config: HtConfig) -> Result<Self> {
        let file = File::open(&config.path)?;
        Ok(Self {
            config,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn config(&self) -> &HtConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    pub fn read_block(&self, seq: i32) -> Result<Vec<u8>> {
        let mut block = vec![0u8; self.config.block_size];
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StratumError::Disposed)?;
        file.seek(SeekFrom::Start(self.config.node_offset(seq)))?;
        file.read_exact(&mut block)?;
        Ok(block)
    }

    pub fn write_block(&self, seq: i32, block: &[u8]) -> Result<()> {
        debug_assert_eq!(block.len(), self.config.block_size);
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StratumError::Disposed)?;
        file.seek(SeekFrom::Start(self.config.node_offset(seq)))?;
        file.write_all(block)?;
        Ok(())
    }

    pub fn write_header(&self, header: &TreeHeader) -> Result<()> {
        let block = header.encode();
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StratumError::Disposed)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&block)?;
        file.sync_all()?;
        Ok(())
    }

    /// A fresh handle positioned at `offset`, independent from the tree's own handle.
    pub fn reader_at(&self, offset: u64) -> Result<File> {
        if !self.is_open() {
            return Err(StratumError::Disposed);
        }
        let mut file = File::open(&self.config.path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    }

    pub fn close(&self) {
        self.file.lock().take();
    }

    /// Close the file and delete it.
    pub fn delete_file(&self) -> Result<()> {
        self.close();
        match std::fs::remove_file(&self.config.path) {
            Ok(()) => {
                log::debug!("Removed history file {}", self.config.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
