//! Segment tree nodes and their block encoding.
//!
//! Block layout, little-endian:
//!
//! ```text
//! type u8 | start i64 | end i64 | seq i32 | parent i32 | count i32 | done u8
//! max start i64 | min end i64 | shortest i64 | longest i64
//! [core only] child count i32 | max_children x (seq i32, start i64, end i64,
//!             max start i64, min end i64, shortest i64, longest i64)
//! segments, each in its own encoding
//! zero padding up to the block size
//! ```

use super::DiskSegment;
use crate::backend::history_tree::node::NodeKind;
use crate::error::{Result, StratumError};
use bytes::{Buf, BufMut, BytesMut};
use smallvec::SmallVec;
use stratum_types::Segment;

const STATS_SIZE: usize = 4 * 8;
const COMMON_HEADER_SIZE: usize = 1 + 8 + 8 + 4 + 4 + 4 + 1 + STATS_SIZE;
const CHILD_ENTRY_SIZE: usize = 4 + 8 + 8 + STATS_SIZE;

/// Bytes taken by a node header of the given kind.
pub fn header_size(kind: NodeKind, max_children: usize) -> usize {
    match kind {
        NodeKind::Core => COMMON_HEADER_SIZE + 4 + max_children * CHILD_ENTRY_SIZE,
        NodeKind::Leaf => COMMON_HEADER_SIZE,
    }
}

/// Bounds over a set of segments. Lets a walk order subtrees without reading them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStats {
    pub max_start: i64,
    pub min_end: i64,
    pub shortest: i64,
    pub longest: i64,
}

impl SegmentStats {
    pub const EMPTY: SegmentStats = SegmentStats {
        max_start: i64::MIN,
        min_end: i64::MAX,
        shortest: i64::MAX,
        longest: i64::MIN,
    };

    pub fn add<S: Segment>(&mut self, segment: &S) {
        self.max_start = self.max_start.max(segment.start());
        self.min_end = self.min_end.min(segment.end());
        self.shortest = self.shortest.min(segment.length());
        self.longest = self.longest.max(segment.length());
    }

    pub fn merge(&mut self, other: &SegmentStats) {
        self.max_start = self.max_start.max(other.max_start);
        self.min_end = self.min_end.min(other.min_end);
        self.shortest = self.shortest.min(other.shortest);
        self.longest = self.longest.max(other.longest);
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_i64_le(self.max_start);
        buf.put_i64_le(self.min_end);
        buf.put_i64_le(self.shortest);
        buf.put_i64_le(self.longest);
    }

    fn get(buf: &mut &[u8]) -> Self {
        SegmentStats {
            max_start: buf.get_i64_le(),
            min_end: buf.get_i64_le(),
            shortest: buf.get_i64_le(),
            longest: buf.get_i64_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentChild {
    pub seq: i32,
    pub start: i64,
    /// `i64::MAX` until the child is closed.
    pub end: i64,
    /// Bounds over the child's whole subtree.
    pub stats: SegmentStats,
}

#[derive(Debug, Clone)]
pub struct SegmentNode<S> {
    kind: NodeKind,
    block_size: usize,
    max_children: usize,
    seq: i32,
    parent_seq: i32,
    start: i64,
    end: i64,
    done: bool,
    stats: SegmentStats,
    segments: Vec<S>,
    used: usize,
    children: SmallVec<[SegmentChild; 8]>,
}

impl<S: DiskSegment> SegmentNode<S> {
    pub fn new(
        kind: NodeKind,
        block_size: usize,
        max_children: usize,
        seq: i32,
        parent_seq: i32,
        start: i64,
    ) -> Self {
        Self {
            kind,
            block_size,
            max_children,
            seq,
            parent_seq,
            start,
            end: start,
            done: false,
            stats: SegmentStats::EMPTY,
            segments: Vec::new(),
            used: 0,
            children: SmallVec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn seq(&self) -> i32 {
        self.seq
    }

    pub fn parent_seq(&self) -> i32 {
        self.parent_seq
    }

    pub fn set_parent_seq(&mut self, parent_seq: i32) {
        self.parent_seq = parent_seq;
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        if self.done { self.end } else { i64::MAX }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn segments(&self) -> &[S] {
        &self.segments
    }

    pub fn children(&self) -> &[SegmentChild] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn latest_child(&self) -> Option<SegmentChild> {
        self.children.last().copied()
    }

    pub fn free_space(&self) -> usize {
        self.block_size
            .saturating_sub(header_size(self.kind, self.max_children) + self.used)
    }

    pub fn add_segment(&mut self, segment: S) {
        debug_assert!(segment.size_on_disk() <= self.free_space());
        self.used += segment.size_on_disk();
        self.stats.add(&segment);
        self.segments.push(segment);
    }

    pub fn link_child(&mut self, seq: i32, start: i64, stats: SegmentStats) {
        debug_assert!(self.kind == NodeKind::Core && self.children.len() < self.max_children);
        self.children.push(SegmentChild {
            seq,
            start,
            end: i64::MAX,
            stats,
        });
    }

    /// Account for a segment stored somewhere under the latest child.
    pub fn note_in_latest_child(&mut self, segment: &S) {
        if let Some(child) = self.children.last_mut() {
            child.stats.add(segment);
        }
    }

    pub fn close_latest_child(&mut self, end: i64) {
        if let Some(child) = self.children.last_mut() {
            child.end = end;
        }
    }

    pub fn close(&mut self, end: i64) {
        self.end = end.max(self.start);
        self.done = true;
    }

    /// Bounds over this node and everything below it.
    pub fn subtree_stats(&self) -> SegmentStats {
        let mut stats = self.stats;
        for child in &self.children {
            stats.merge(&child.stats);
        }
        stats
    }

    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.block_size);
        buf.put_u8(self.kind.tag());
        buf.put_i64_le(self.start);
        buf.put_i64_le(self.end);
        buf.put_i32_le(self.seq);
        buf.put_i32_le(self.parent_seq);
        buf.put_i32_le(self.segments.len() as i32);
        buf.put_u8(u8::from(self.done));
        self.stats.put(&mut buf);

        if self.kind == NodeKind::Core {
            buf.put_i32_le(self.children.len() as i32);
            for i in 0..self.max_children {
                let child = self.children.get(i).copied().unwrap_or(SegmentChild {
                    seq: -1,
                    start: 0,
                    end: 0,
                    stats: SegmentStats::EMPTY,
                });
                buf.put_i32_le(child.seq);
                buf.put_i64_le(child.start);
                buf.put_i64_le(child.end);
                child.stats.put(&mut buf);
            }
        }

        for segment in &self.segments {
            segment.write_to(&mut buf);
        }

        if buf.len() > self.block_size {
            return Err(StratumError::InvalidInput(format!(
                "segment node {} overflows its {} byte block",
                self.seq, self.block_size
            )));
        }
        buf.resize(self.block_size, 0);
        Ok(buf)
    }

    pub fn decode(block: &[u8], block_size: usize, max_children: usize) -> Result<Self> {
        let mut buf = block;
        need(&buf, COMMON_HEADER_SIZE)?;
        let tag = buf.get_u8();
        let kind = NodeKind::from_tag(tag)
            .ok_or_else(|| StratumError::InvalidFormat(format!("unknown node type {}", tag)))?;
        let start = buf.get_i64_le();
        let end = buf.get_i64_le();
        let seq = buf.get_i32_le();
        let parent_seq = buf.get_i32_le();
        let count = buf.get_i32_le();
        let done = buf.get_u8() == 1;

        let mut node = SegmentNode::new(kind, block_size, max_children, seq, parent_seq, start);
        node.end = end;
        node.done = done;
        node.stats = SegmentStats::get(&mut buf);

        if kind == NodeKind::Core {
            need(&buf, 4 + max_children * CHILD_ENTRY_SIZE)?;
            let child_count = buf.get_i32_le();
            if child_count < 0 || child_count as usize > max_children {
                return Err(StratumError::InvalidFormat(format!(
                    "segment node {} claims {} children",
                    seq, child_count
                )));
            }
            for i in 0..max_children {
                let child = SegmentChild {
                    seq: buf.get_i32_le(),
                    start: buf.get_i64_le(),
                    end: buf.get_i64_le(),
                    stats: SegmentStats::get(&mut buf),
                };
                if i < child_count as usize {
                    node.children.push(child);
                }
            }
        }

        if count < 0 {
            return Err(StratumError::InvalidFormat(format!(
                "segment node {} claims {} segments",
                seq, count
            )));
        }
        for _ in 0..count {
            let segment = S::read_from(&mut buf)?;
            node.used += segment.size_on_disk();
            node.segments.push(segment);
        }
        Ok(node)
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(StratumError::InvalidFormat(
            "segment node block is truncated".to_string(),
        ));
    }
    Ok(())
}
