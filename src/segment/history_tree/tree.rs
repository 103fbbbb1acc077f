//! History tree holding segments.
//!
//! Same file layout and latest-branch insertion as the state history tree,
//! with two differences. A new branch starts at the start of the segment that
//! caused the split, so siblings may overlap in time and every child records
//! its own end. Each child entry also carries bounds over its subtree, which
//! lets a sorted walk visit nodes lazily in the requested order.

use super::node::{self, SegmentNode, SegmentStats};
use super::{DiskSegment, SegmentOrder};
use crate::backend::history_tree::config::HtConfig;
use crate::backend::history_tree::io::{HtIo, TreeHeader};
use crate::backend::history_tree::node::NodeKind;
use crate::error::{Result, StratumError};
use crate::segment::natural_order;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::Path;

const SEGMENT_FILE_MAGIC: i32 = 0x05FF_C600;
const FILE_VERSION: i32 = 1;

/// Smallest block that fits a core node with `max_children` children and still leaves room for segments.
pub fn min_block_size(max_children: usize) -> usize {
    node::header_size(NodeKind::Core, max_children) + 64
}

struct TreeState<S> {
    latest_branch: Vec<SegmentNode<S>>,
    node_count: i32,
    tree_end: i64,
    segment_count: u64,
    closed: bool,
}

pub struct SegmentHistoryTree<S> {
    io: HtIo,
    state: RwLock<TreeState<S>>,
}

impl<S: DiskSegment> SegmentHistoryTree<S> {
    /// Start a new, empty tree, truncating any file at the configured path.
    pub fn create(config: HtConfig) -> Result<Self> {
        if config.max_children < 2 || config.block_size < min_block_size(config.max_children) {
            return Err(StratumError::InvalidInput(format!(
                "block size {} cannot hold a segment node with {} children",
                config.block_size, config.max_children
            )));
        }
        log::debug!(
            "Creating segment tree {} (block size {}, {} children per node)",
            config.path.display(),
            config.block_size,
            config.max_children
        );
        let state = Self::empty_state(&config);
        Ok(Self {
            io: HtIo::create(config)?,
            state: RwLock::new(state),
        })
    }

    /// Open a finished segment file. Its content can be queried but not extended.
    pub fn open<P: AsRef<Path>>(path: P, provider_version: u32) -> Result<Self> {
        let path = path.as_ref();
        let header = TreeHeader::read(path, SEGMENT_FILE_MAGIC, FILE_VERSION, provider_version)?;
        let io = HtIo::open(HtConfig {
            path: path.to_path_buf(),
            block_size: header.block_size,
            max_children: header.max_children,
            provider_version,
            start_time: header.start_time,
        })?;

        let mut latest_branch = vec![Self::read_node(&io, header.root_seq)?];
        while let Some(child) = latest_branch.last().and_then(SegmentNode::latest_child) {
            if latest_branch.len() > header.node_count as usize {
                return Err(StratumError::InvalidFormat(
                    "segment file has a cycle in its latest branch".to_string(),
                ));
            }
            let node = Self::read_node(&io, child.seq)?;
            let parent_seq = latest_branch[latest_branch.len() - 1].seq();
            if node.parent_seq() != parent_seq {
                return Err(StratumError::InvalidFormat(format!(
                    "segment node {} points to parent {} instead of {}",
                    node.seq(),
                    node.parent_seq(),
                    parent_seq
                )));
            }
            latest_branch.push(node);
        }
        if let Some(open_node) = latest_branch.iter().find(|n| !n.is_done()) {
            return Err(StratumError::InvalidFormat(format!(
                "segment node {} was never closed",
                open_node.seq()
            )));
        }
        if latest_branch[0].start() != header.start_time {
            return Err(StratumError::InvalidFormat(format!(
                "start time {} in the header does not match the root node start {}",
                header.start_time,
                latest_branch[0].start()
            )));
        }

        let tree_end = latest_branch[0].end();
        log::debug!(
            "Opened segment tree {} with {} segments in {} nodes",
            path.display(),
            header.element_count,
            header.node_count
        );
        Ok(Self {
            io,
            state: RwLock::new(TreeState {
                latest_branch,
                node_count: header.node_count,
                tree_end,
                segment_count: header.element_count,
                closed: true,
            }),
        })
    }

    fn empty_state(config: &HtConfig) -> TreeState<S> {
        let root = SegmentNode::new(
            NodeKind::Leaf,
            config.block_size,
            config.max_children,
            0,
            -1,
            config.start_time,
        );
        TreeState {
            latest_branch: vec![root],
            node_count: 1,
            tree_end: config.start_time,
            segment_count: 0,
            closed: false,
        }
    }

    fn read_node(io: &HtIo, seq: i32) -> Result<SegmentNode<S>> {
        let config = io.config();
        let block = io.read_block(seq)?;
        let node = SegmentNode::decode(&block, config.block_size, config.max_children)?;
        if node.seq() != seq {
            return Err(StratumError::InvalidFormat(format!(
                "block {} holds segment node {}",
                seq,
                node.seq()
            )));
        }
        Ok(node)
    }

    fn write_node(&self, node: &SegmentNode<S>) -> Result<()> {
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

    pub fn segment_count(&self) -> u64 {
        self.state.read().segment_count
    }

    pub fn node_count(&self) -> i32 {
        self.state.read().node_count
    }

    pub fn depth(&self) -> usize {
        self.state.read().latest_branch.len()
    }

    pub fn is_finished(&self) -> bool {
        self.state.read().closed
    }

    /// Reject segments this tree can never store.
    pub fn check_segment(&self, segment: &S) -> Result<()> {
        crate::segment::check_segment(segment)?;
        let config = self.config();
        let room = config.block_size - node::header_size(NodeKind::Core, config.max_children);
        if segment.size_on_disk() > room {
            return Err(StratumError::InvalidInput(format!(
                "segment of {} bytes does not fit in a segment tree node",
                segment.size_on_disk()
            )));
        }
        if segment.start() < self.start_time() {
            return Err(StratumError::TimeRange(format!(
                "segment start {} precedes the tree start {}",
                segment.start(),
                self.start_time()
            )));
        }
        Ok(())
    }

    pub fn insert(&self, segment: S) -> Result<()> {
        self.check_segment(&segment)?;
        let size = segment.size_on_disk();

        let mut state = self.state.write();
        if state.closed {
            return Err(StratumError::Unsupported(
                "segments cannot be added to a finished segment tree",
            ));
        }
        if !self.io.is_open() {
            return Err(StratumError::Disposed);
        }

        let mut index = state.latest_branch.len() - 1;
        loop {
            let target = &state.latest_branch[index];
            if size > target.free_space() {
                self.add_sibling_node(&mut state, index, segment.start())?;
                index = state.latest_branch.len() - 1;
                continue;
            }
            if segment.start() < target.start() {
                // The root starts at the tree start, so climbing always ends there.
                index = index.checked_sub(1).ok_or_else(|| {
                    StratumError::InvalidInput(format!(
                        "segment starting at {} precedes the tree root",
                        segment.start()
                    ))
                })?;
                continue;
            }
            state.tree_end = state.tree_end.max(segment.end());
            state.segment_count += 1;
            for ancestor in &mut state.latest_branch[..index] {
                ancestor.note_in_latest_child(&segment);
            }
            state.latest_branch[index].add_segment(segment);
            return Ok(());
        }
    }

    fn new_node(
        &self,
        state: &mut TreeState<S>,
        kind: NodeKind,
        parent_seq: i32,
        start: i64,
    ) -> SegmentNode<S> {
        let config = self.config();
        let node = SegmentNode::new(
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

    /// Close `branch[from..]` at `end`, leaf first, so each parent records its child's end.
    fn close_branch(&self, branch: &mut [SegmentNode<S>], from: usize, end: i64) -> Result<()> {
        for i in (from..branch.len()).rev() {
            branch[i].close(end);
            self.write_node(&branch[i])?;
            if i > 0 {
                let child_end = branch[i].end();
                branch[i - 1].close_latest_child(child_end);
            }
        }
        Ok(())
    }

    /// Replace the latest branch from `index` down with fresh nodes starting at `new_start`.
    fn add_sibling_node(
        &self,
        state: &mut TreeState<S>,
        mut index: usize,
        new_start: i64,
    ) -> Result<()> {
        loop {
            if index == 0 {
                return self.add_new_root_node(state, new_start);
            }
            let parent = &state.latest_branch[index - 1];
            if parent.child_count() < self.config().max_children && new_start >= parent.start() {
                break;
            }
            index -= 1;
        }

        log::trace!(
            "Splitting segment tree at level {} (time {}, new branch at {})",
            index,
            state.tree_end,
            new_start
        );
        let split_time = state.tree_end;
        self.close_branch(&mut state.latest_branch, index, split_time)?;
        for i in index..state.latest_branch.len() {
            let kind = state.latest_branch[i].kind();
            let parent_seq = state.latest_branch[i - 1].seq();
            let node = self.new_node(state, kind, parent_seq, new_start);
            state.latest_branch[i - 1].link_child(node.seq(), node.start(), SegmentStats::EMPTY);
            state.latest_branch[i] = node;
        }
        Ok(())
    }

    fn add_new_root_node(&self, state: &mut TreeState<S>, new_start: i64) -> Result<()> {
        let split_time = state.tree_end;
        let depth = state.latest_branch.len();
        let start = self.start_time();
        let mut new_root = self.new_node(state, NodeKind::Core, -1, start);
        log::trace!(
            "Adding segment tree root #{} (depth {}, split at {})",
            new_root.seq(),
            depth + 1,
            split_time
        );

        state.latest_branch[0].set_parent_seq(new_root.seq());
        self.close_branch(&mut state.latest_branch, 0, split_time)?;
        let old_root = &state.latest_branch[0];
        new_root.link_child(old_root.seq(), old_root.start(), old_root.subtree_stats());
        new_root.close_latest_child(old_root.end());

        let mut branch = Vec::with_capacity(depth + 1);
        branch.push(new_root);
        for level in 1..=depth {
            let kind = if level == depth {
                NodeKind::Leaf
            } else {
                NodeKind::Core
            };
            let parent_seq = branch[level - 1].seq();
            let node = self.new_node(state, kind, parent_seq, new_start);
            branch[level - 1].link_child(node.seq(), node.start(), SegmentStats::EMPTY);
            branch.push(node);
        }
        state.latest_branch = branch;
        Ok(())
    }

    /// Close every open node at the latest segment end, then write the header.
    pub fn close_tree(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        let end_time = state.tree_end;
        self.close_branch(&mut state.latest_branch, 0, end_time)?;

        let config = self.config();
        self.io.write_header(&TreeHeader {
            magic: SEGMENT_FILE_MAGIC,
            file_version: FILE_VERSION,
            provider_version: config.provider_version,
            block_size: config.block_size,
            max_children: config.max_children,
            node_count: state.node_count,
            root_seq: state.latest_branch[0].seq(),
            start_time: state.latest_branch[0].start(),
            element_count: state.segment_count,
        })?;
        state.closed = true;
        log::debug!(
            "Closed segment tree {} with {} segments in {} nodes",
            config.path.display(),
            state.segment_count,
            state.node_count
        );
        Ok(())
    }

    /// Forget every segment. New nodes overwrite the file from its first block;
    /// a finished file stays untouched on disk.
    pub fn clear(&self) {
        let mut state = self.state.write();
        let closed = state.closed;
        *state = Self::empty_state(self.config());
        state.closed = closed;
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

    fn node<'a>(&self, state: &'a TreeState<S>, seq: i32) -> Result<Cow<'a, SegmentNode<S>>> {
        match state.latest_branch.iter().find(|n| n.seq() == seq) {
            Some(node) => Ok(Cow::Borrowed(node)),
            None => Ok(Cow::Owned(Self::read_node(&self.io, seq)?)),
        }
    }

    /// Segments overlapping `[low, high]`, in natural order.
    pub fn intersecting(&self, low: i64, high: i64) -> Result<Vec<S>> {
        let state = self.state.read();
        let mut found = Vec::new();
        let mut stack = vec![Cow::Borrowed(&state.latest_branch[0])];
        while let Some(current) = stack.pop() {
            found.extend(
                current
                    .segments()
                    .iter()
                    .filter(|s| s.intersects(low, high))
                    .cloned(),
            );
            for child in current.children() {
                if !(low > child.end || high < child.start) {
                    stack.push(self.node(&state, child.seq)?);
                }
            }
        }
        found.sort_by(natural_order);
        Ok(found)
    }

    /// Up to `limit` segments in `order`, ties in natural order.
    ///
    /// Subtrees wait in a priority queue keyed by the bound their child entry
    /// records for `order`, so only the nodes that can hold one of the first
    /// `limit` segments are read.
    pub fn sorted(&self, order: SegmentOrder, limit: usize) -> Result<Vec<S>> {
        let state = self.state.read();
        let mut found = Vec::new();
        let mut pending = BinaryHeap::new();
        pending.push(Reverse(Pending::Node {
            key: i64::MIN,
            seq: state.latest_branch[0].seq(),
        }));

        while found.len() < limit {
            let Some(Reverse(next)) = pending.pop() else {
                break;
            };
            match next {
                Pending::Segment { segment, .. } => found.push(segment),
                Pending::Node { seq, .. } => {
                    let current = self.node(&state, seq)?;
                    for segment in current.segments() {
                        pending.push(Reverse(Pending::Segment {
                            key: order.segment_key(segment),
                            segment: segment.clone(),
                        }));
                    }
                    for child in current.children() {
                        pending.push(Reverse(Pending::Node {
                            key: order.child_key(child),
                            seq: child.seq,
                        }));
                    }
                }
            }
        }
        Ok(found)
    }
}

/// Entry of the sorted walk's queue. Keys grow along the walk: a node comes
/// before any segment with the same key so that its content is queued first.
enum Pending<S> {
    Node { key: i64, seq: i32 },
    Segment { key: i64, segment: S },
}

impl<S: DiskSegment> Ord for Pending<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Pending::Node { key: a, seq: x }, Pending::Node { key: b, seq: y }) => {
                a.cmp(b).then(x.cmp(y))
            }
            (Pending::Node { key: a, .. }, Pending::Segment { key: b, .. }) => {
                a.cmp(b).then(Ordering::Less)
            }
            (Pending::Segment { key: a, .. }, Pending::Node { key: b, .. }) => {
                a.cmp(b).then(Ordering::Greater)
            }
            (
                Pending::Segment { key: a, segment: x },
                Pending::Segment { key: b, segment: y },
            ) => a.cmp(b).then_with(|| natural_order(x, y)),
        }
    }
}

impl<S: DiskSegment> PartialOrd for Pending<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: DiskSegment> PartialEq for Pending<S> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<S: DiskSegment> Eq for Pending<S> {}
