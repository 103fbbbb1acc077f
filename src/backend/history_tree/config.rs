use super::node::{self, NodeKind};
use crate::config::Config;
use std::path::{Path, PathBuf};

/// Size of the file header block preceding the first node.
pub const TREE_HEADER_SIZE: usize = 4096;

/// Smallest block that fits a core node with `max_children` children and still leaves room for intervals.
pub fn min_block_size(max_children: usize) -> usize {
    node::header_size(NodeKind::Core, max_children) + 64
}

/// Parameters of one history tree file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtConfig {
    pub path: PathBuf,
    pub block_size: usize,
    pub max_children: usize,
    pub provider_version: u32,
    pub start_time: i64,
}

impl HtConfig {
    pub fn new<P: AsRef<Path>>(path: P, config: &Config, start_time: i64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            block_size: config.block_size,
            max_children: config.max_children,
            provider_version: config.provider_version,
            start_time,
        }
    }

    /// Byte offset of node `seq` in the file.
    pub fn node_offset(&self, seq: i32) -> u64 {
        TREE_HEADER_SIZE as u64 + seq as u64 * self.block_size as u64
    }
}
