//! The history tree.
//!
//! Nodes are fixed-size blocks appended to a file. Only the "latest branch",
//! the path from the root to the most recent leaf, is open for insertion and
//! kept in memory; every other node is closed and lives on disk. Each node
//! covers a time span, and a point query follows a single root-to-leaf path.

use super::config::{HtConfig, min_block_size};
use super::io::{HtIo, TreeHeader};
use super::node::{self, HtNode, NodeKind};
use crate::condition::{QuarkRange, TimeRange};
use crate::error::{Result, StratumError};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use stratum_types::{Quark, StateInterval, StateValue};

const HISTORY_FILE_MAGIC: i32 = 0x05FF_A900;
const FILE_VERSION: i32 = 1;

struct TreeState {
    latest_branch: Vec<HtNode>,
    node_count: i32,
    tree_end: i64,
    interval_count: u64,
    closed: bool,
}

pub struct HistoryTree {
    io: HtIo,
    state: RwLock<TreeState>,
}

impl HistoryTree {
    /// Start a new, empty tree, truncating any file at the configured path.
    pub fn create(config: HtConfig) -> Result<Self> {
        if config.max_children < 2 || config.block_size < min_block_size(config.max_children) {
            return Err(StratumError::InvalidInput(format!(
                "block size {} cannot hold a core node with {} children",
                config.block_size, config.max_children
            )));
        }

        let root = HtNode::new(
            NodeKind::Leaf,
            config.block_size,
            config.max_children,
            0,
            -1,
            config.start_time,
        );
        let tree_end = config.start_time;
        log::debug!(
            "Creating history tree {} (block size {}, {} children per node)",
            config.path.display(),
            config.block_size,
            config.max_children
        );
        let io = HtIo::create(config)?;
        Ok(Self {
            io,
            state: RwLock::new(TreeState {
                latest_branch: vec![root],
                node_count: 1,
                tree_end,
                interval_count: 0,
                closed: false,
            }),
        })
    }

    /// Open a finished tree file. Fails when the file was built by another provider version.
    pub fn open<P: AsRef<Path>>(path: P, provider_version: u32) -> Result<Self> {
        let path = path.as_ref();
        let header = TreeHeader::read(path, HISTORY_FILE_MAGIC, FILE_VERSION, provider_version)?;
        let config = HtConfig {
            path: path.to_path_buf(),
            block_size: header.block_size,
            max_children: header.max_children,
            provider_version,
            start_time: header.start_time,
        };
        let io = HtIo::open(config)?;

        let root = Self::read_node(&io, header.root_seq)?;
        if root.parent_seq() != -1 {
            return Err(StratumError::InvalidFormat(format!(
                "root node {} has parent {}",
                root.seq(),
                root.parent_seq()
            )));
        }
        let mut latest_branch = vec![root];
        while let Some(child) = latest_branch.last().and_then(HtNode::latest_child) {
            if latest_branch.len() > header.node_count as usize {
                return Err(StratumError::InvalidFormat(
                    "history file has a cycle in its latest branch".to_string(),
                ));
            }
            let node = Self::read_node(&io, child.seq)?;
            let parent_seq = latest_branch[latest_branch.len() - 1].seq();
            if node.parent_seq() != parent_seq {
                return Err(StratumError::InvalidFormat(format!(
                    "node {} points to parent {} instead of {}",
                    node.seq(),
                    node.parent_seq(),
                    parent_seq
                )));
            }
            latest_branch.push(node);
        }
        // A finished file has every node closed.
        if let Some(open_node) = latest_branch.iter().find(|n| !n.is_done()) {
            return Err(StratumError::InvalidFormat(format!(
                "node {} of the history file was never closed",
                open_node.seq()
            )));
        }

        let root = &latest_branch[0];
        if root.start() != header.start_time {
            return Err(StratumError::InvalidFormat(format!(
                "start time {} in the header does not match the root node start {}",
                header.start_time,
                root.start()
            )));
        }
        let tree_end = root.end();
        log::debug!(
            "Opened history tree {} with {} nodes, [{}, {}]",
            path.display(),
            header.node_count,
            header.start_time,
            tree_end
        );

        Ok(Self {
            io,
            state: RwLock::new(TreeState {
                latest_branch,
                node_count: header.node_count,
                tree_end,
                interval_count: header.element_count,
                closed: true,
            }),
        })
    }

    fn read_node(io: &HtIo, seq: i32) -> Result<HtNode> {
        let config = io.config();
        let block = io.read_block(seq)?;
        let node = HtNode::decode(&block, config.block_size, config.max_children)?;
        if node.seq() != seq {
            return Err(StratumError::InvalidFormat(format!(
                "block {} holds node {}",
                seq,
                node.seq()
            )));
        }
        Ok(node)
    }

    fn write_node(&self, node: &HtNode) -> Result<()> {
        self.io.write_block(node.seq(), &node.encode()?)
    }

    pub fn config(&self) -> &HtConfig {
        self.io.config()
    }

    pub fn start_time(&self) -> i64 {
        self.config().start_time
    }

    pub fn end_time(&self) -> i64 {
        self.state.read().tree_end
    }

    pub fn node_count(&self) -> i32 {
        self.state.read().node_count
    }

    pub fn interval_count(&self) -> u64 {
        self.state.read().interval_count
    }

    pub fn depth(&self) -> usize {
        self.state.read().latest_branch.len()
    }

    /// Largest interval an empty node of either kind can hold.
    fn max_interval_size(&self) -> usize {
        let config = self.config();
        config.block_size - node::header_size(NodeKind::Core, config.max_children)
    }

    /// Reject intervals this tree can never store.
    pub fn check_interval(&self, interval: &StateInterval) -> Result<()> {
        let size = node::interval_size(interval);
        if size > self.max_interval_size() {
            return Err(StratumError::InvalidInput(format!(
                "interval of {} bytes does not fit in a history tree node",
                size
            )));
        }
        if interval.quark() > i32::MAX as usize {
            return Err(StratumError::InvalidInput(format!(
                "attribute {} cannot be stored in a history file",
                interval.quark()
            )));
        }
        if let StateValue::String(s) = interval.value() {
            if s.len() > u16::MAX as usize {
                return Err(StratumError::InvalidInput(format!(
                    "string value of {} bytes is too long for a history file",
                    s.len()
                )));
            }
        }
        // Open nodes report i64::MAX as their end, and splits start one past the tree end.
        if interval.end_time() == i64::MAX {
            return Err(StratumError::TimeRange(format!(
                "interval end {} is reserved for open history tree nodes",
                i64::MAX
            )));
        }
        if interval.start_time() < self.start_time() {
            return Err(StratumError::time_out_of_range(
                interval.start_time(),
                self.start_time(),
                self.end_time(),
            ));
        }
        Ok(())
    }

    pub fn insert(&self, interval: StateInterval) -> Result<()> {
        self.check_interval(&interval)?;
        let size = node::interval_size(&interval);

        let mut state = self.state.write();
        if state.closed {
            return Err(StratumError::Unsupported(
                "intervals cannot be added to a closed history tree",
            ));
        }
        if !self.io.is_open() {
            return Err(StratumError::Disposed);
        }

        let mut index = state.latest_branch.len() - 1;
        loop {
            let target = &state.latest_branch[index];
            if size > target.free_space() {
                self.add_sibling_node(&mut state, index)?;
                index = state.latest_branch.len() - 1;
                continue;
            }
            if interval.start_time() < target.start() {
                // The root starts at the history start, so climbing always ends there.
                index = index.checked_sub(1).ok_or_else(|| {
                    StratumError::InvalidInput(format!(
                        "interval starting at {} precedes the tree root",
                        interval.start_time()
                    ))
                })?;
                continue;
            }
            state.tree_end = state.tree_end.max(interval.end_time());
            state.interval_count += 1;
            state.latest_branch[index].add_interval(interval);
            return Ok(());
        }
    }

    fn new_node(&self, state: &mut TreeState, kind: NodeKind, parent_seq: i32, start: i64) -> HtNode {
        let config = self.config();
        let node = HtNode::new(
            kind,
            config.block_size,
            config.max_children,
            state.node_count,
            parent_seq,
            start,
        );
        state.node_count += 1;
        node
    }

    /// Close the latest branch from `index` down and open a new one beside it.
    fn add_sibling_node(&self, state: &mut TreeState, mut index: usize) -> Result<()> {
        let split_time = state.tree_end;
        loop {
            if index == 0 {
                return self.add_new_root_node(state);
            }
            if state.latest_branch[index - 1].child_count() < self.config().max_children {
                break;
            }
            index -= 1;
        }

        log::trace!(
            "Splitting history tree at level {} (time {})",
            index,
            split_time
        );
        for i in index..state.latest_branch.len() {
            state.latest_branch[i].close(split_time);
            self.write_node(&state.latest_branch[i])?;

            let kind = state.latest_branch[i].kind();
            let parent_seq = state.latest_branch[i - 1].seq();
            let new_node = self.new_node(state, kind, parent_seq, split_time + 1);
            state.latest_branch[i - 1].link_child(new_node.seq(), new_node.start());
            state.latest_branch[i] = new_node;
        }
        Ok(())
    }

    /// The root is full: put a new root above it and rebuild a one-level-deeper branch.
    fn add_new_root_node(&self, state: &mut TreeState) -> Result<()> {
        let split_time = state.tree_end;
        let depth = state.latest_branch.len();
        let start = self.start_time();
        let mut new_root = self.new_node(state, NodeKind::Core, -1, start);
        log::trace!(
            "Adding history tree root #{} (depth {}, split at {})",
            new_root.seq(),
            depth + 1,
            split_time
        );

        state.latest_branch[0].set_parent_seq(new_root.seq());
        for node in state.latest_branch.iter_mut() {
            node.close(split_time);
            self.write_node(node)?;
        }
        new_root.link_child(state.latest_branch[0].seq(), state.latest_branch[0].start());

        let mut branch = Vec::with_capacity(depth + 1);
        branch.push(new_root);
        for level in 1..=depth {
            let kind = if level == depth {
                NodeKind::Leaf
            } else {
                NodeKind::Core
            };
            let parent_seq = branch[level - 1].seq();
            let node = self.new_node(state, kind, parent_seq, split_time + 1);
            branch[level - 1].link_child(node.seq(), node.start());
            branch.push(node);
        }
        state.latest_branch = branch;
        Ok(())
    }

    /// Close every open node at `end_time`, write them, then write the header.
    pub fn close_tree(&self, end_time: i64) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        let end_time = end_time.max(state.tree_end);
        for node in state.latest_branch.iter_mut() {
            node.close(end_time);
            self.write_node(node)?;
        }

        let config = self.config();
        self.io.write_header(&TreeHeader {
            magic: HISTORY_FILE_MAGIC,
            file_version: FILE_VERSION,
            provider_version: config.provider_version,
            block_size: config.block_size,
            max_children: config.max_children,
            node_count: state.node_count,
            root_seq: state.latest_branch[0].seq(),
            start_time: state.latest_branch[0].start(),
            element_count: state.interval_count,
        })?;

        state.tree_end = end_time;
        state.closed = true;
        log::debug!(
            "Closed history tree {} with {} nodes at {}",
            config.path.display(),
            state.node_count,
            end_time
        );
        Ok(())
    }

    /// Byte offset right after the last node, where the attribute tree goes.
    pub fn attribute_tree_offset(&self) -> u64 {
        self.config().node_offset(self.node_count())
    }

    pub fn attribute_tree_reader(&self) -> Result<File> {
        self.io.reader_at(self.attribute_tree_offset())
    }

    pub fn is_open(&self) -> bool {
        self.io.is_open()
    }

    pub fn close_file(&self) {
        self.io.close();
    }

    pub fn delete_file(&self) -> Result<()> {
        self.io.delete_file()
    }

    /// Node `seq`, from the latest branch if it is there, otherwise from disk.
    fn node<'a>(&self, state: &'a TreeState, seq: i32) -> Result<Cow<'a, HtNode>> {
        match state.latest_branch.iter().find(|n| n.seq() == seq) {
            Some(node) => Ok(Cow::Borrowed(node)),
            None => Ok(Cow::Owned(Self::read_node(&self.io, seq)?)),
        }
    }

    fn select_next_child<'a>(
        &self,
        state: &'a TreeState,
        current: &HtNode,
        t: i64,
    ) -> Result<Cow<'a, HtNode>> {
        let seq = current.child_for(t).ok_or_else(|| {
            StratumError::InvalidFormat(format!(
                "core node {} has no child covering {}",
                current.seq(),
                t
            ))
        })?;
        self.node(state, seq)
    }

    fn check_readable(&self, state: &TreeState, t: i64) -> Result<()> {
        if !self.io.is_open() {
            return Err(StratumError::Disposed);
        }
        if t < self.start_time() || t > state.tree_end {
            return Err(StratumError::time_out_of_range(
                t,
                self.start_time(),
                state.tree_end,
            ));
        }
        Ok(())
    }

    pub fn query(&self, slots: &mut [Option<StateInterval>], t: i64) -> Result<()> {
        let state = self.state.read();
        self.check_readable(&state, t)?;

        let mut current = Cow::Borrowed(&state.latest_branch[0]);
        current.write_info(slots, t);
        while current.is_core() {
            current = self.select_next_child(&state, &current, t)?;
            current.write_info(slots, t);
        }
        Ok(())
    }

    pub fn singular_query(&self, t: i64, quark: Quark) -> Result<StateInterval> {
        let state = self.state.read();
        self.check_readable(&state, t)?;

        let mut current = Cow::Borrowed(&state.latest_branch[0]);
        loop {
            if let Some(interval) = current.relevant_interval(t, quark) {
                return Ok(interval.clone());
            }
            if !current.is_core() {
                return Err(StratumError::AttributeNotFound { quark, time: t });
            }
            current = self.select_next_child(&state, &current, t)?;
        }
    }

    /// Depth-first walk of every node overlapping `times`.
    pub fn query_2d(&self, quarks: &QuarkRange, times: &TimeRange) -> Result<Vec<StateInterval>> {
        let state = self.state.read();
        if !self.io.is_open() {
            return Err(StratumError::Disposed);
        }

        let mut found = Vec::new();
        let mut stack = vec![Cow::Borrowed(&state.latest_branch[0])];
        while let Some(current) = stack.pop() {
            found.extend(
                current
                    .intervals()
                    .iter()
                    .filter(|i| quarks.test(i.quark()))
                    .filter(|i| times.intersects(i.start_time(), i.end_time()))
                    .cloned(),
            );

            let children = current.children();
            for (i, child) in children.iter().enumerate() {
                let child_end = children
                    .get(i + 1)
                    .map_or(current.end(), |next| next.start.saturating_sub(1));
                if times.intersects(child.start, child_end) {
                    stack.push(self.node(&state, child.seq)?);
                }
            }
        }
        Ok(found)
    }

    pub fn debug_print(&self, out: &mut dyn Write) -> Result<()> {
        let state = self.state.read();
        let config = self.config();
        writeln!(
            out,
            "History tree {}: [{}, {}], {} intervals in {} nodes, depth {}, block size {}, max children {}",
            config.path.display(),
            config.start_time,
            state.tree_end,
            state.interval_count,
            state.node_count,
            state.latest_branch.len(),
            config.block_size,
            config.max_children
        )?;
        if !self.io.is_open() {
            writeln!(out, "(file closed)")?;
            return Ok(());
        }
        for seq in 0..state.node_count {
            let node = self.node(&state, seq)?;
            writeln!(out, "{}", node)?;
            for interval in node.intervals() {
                writeln!(out, "  {}", interval)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tree(dir: &tempfile::TempDir) -> HistoryTree {
        let config = HtConfig {
            path: dir.path().join("test.ht"),
            block_size: 4096,
            max_children: 3,
            provider_version: 0,
            start_time: 0,
        };
        HistoryTree::create(config).unwrap()
    }

    #[test]
    fn test_tree_grows_and_answers_queries() {
        let dir = tempfile::tempdir().unwrap();
        let tree = small_tree(&dir);

        // 21 bytes per null interval: a 4 KiB leaf takes under 200, so this forces many splits.
        for t in 0..3000i64 {
            tree.insert(StateInterval::new(t, t, (t % 4) as usize, StateValue::Null))
                .unwrap();
        }
        assert!(tree.node_count() > 10);
        assert!(tree.depth() >= 3);

        for t in [0, 1, 999, 1500, 2999] {
            let interval = tree.singular_query(t, (t % 4) as usize).unwrap();
            assert_eq!(interval.start_time(), t);
        }
        tree.close_tree(3000).unwrap();
        assert_eq!(tree.end_time(), 3000);
        let interval = tree.singular_query(2998, 2).unwrap();
        assert_eq!(interval.start_time(), 2998);
    }

    #[test]
    fn test_closed_tree_rejects_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let tree = small_tree(&dir);
        tree.insert(StateInterval::new(0, 5, 0, StateValue::Int(1)))
            .unwrap();
        tree.close_tree(5).unwrap();
        assert!(matches!(
            tree.insert(StateInterval::new(6, 7, 0, StateValue::Int(1))),
            Err(StratumError::Unsupported(_))
        ));
    }

    #[test]
    fn test_end_of_time_is_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let tree = small_tree(&dir);
        assert!(matches!(
            tree.insert(StateInterval::new(0, i64::MAX, 0, StateValue::Null)),
            Err(StratumError::TimeRange(_))
        ));
        assert_eq!(tree.interval_count(), 0);
    }

    #[test]
    fn test_intervals_ending_just_before_end_of_time() {
        let dir = tempfile::tempdir().unwrap();
        let tree = small_tree(&dir);
        let end = i64::MAX - 1;

        // Enough to split the root several times with the tree end at its maximum.
        for i in 0..1000usize {
            tree.insert(StateInterval::new(0, end, i % 4, StateValue::Null))
                .unwrap();
        }
        assert!(tree.node_count() > 3);
        assert_eq!(tree.end_time(), end);
        assert_eq!(tree.interval_count(), 1000);
        assert_eq!(tree.singular_query(0, 2).unwrap().end_time(), end);
        assert_eq!(tree.singular_query(end, 3).unwrap().start_time(), 0);

        tree.close_tree(end).unwrap();
        assert_eq!(tree.end_time(), end);
    }

    #[test]
    fn test_oversized_interval() {
        let dir = tempfile::tempdir().unwrap();
        let tree = small_tree(&dir);
        let huge = "x".repeat(5000);
        assert!(matches!(
            tree.insert(StateInterval::new(0, 1, 0, huge.into())),
            Err(StratumError::InvalidInput(_))
        ));
    }
}
