//! History tree nodes and their fixed-size block encoding.
//!
//! Block layout, little-endian:
//!
//! ```text
//! type u8 | start i64 | end i64 | seq i32 | parent i32 | count i32 | done u8
//! [core only] child count i32 | max_children x (seq i32, start i64)
//! intervals: start i64 | end i64 | quark i32 | tag i8 | payload
//! zero padding up to the block size
//! ```

use crate::error::{Result, StratumError};
use bytes::{Buf, BufMut, BytesMut};
use smallvec::SmallVec;
use std::fmt;
use stratum_types::{StateInterval, StateValue, StateValueType};

const COMMON_HEADER_SIZE: usize = 1 + 8 + 8 + 4 + 4 + 4 + 1;
const CHILD_ENTRY_SIZE: usize = 4 + 8;
const INTERVAL_HEADER_SIZE: usize = 8 + 8 + 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Core,
    Leaf,
}

impl NodeKind {
    pub fn tag(self) -> u8 {
        match self {
            NodeKind::Core => 1,
            NodeKind::Leaf => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(NodeKind::Core),
            2 => Some(NodeKind::Leaf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEntry {
    pub seq: i32,
    pub start: i64,
}

/// Bytes taken by a node header of the given kind.
pub fn header_size(kind: NodeKind, max_children: usize) -> usize {
    match kind {
        NodeKind::Core => COMMON_HEADER_SIZE + 4 + max_children * CHILD_ENTRY_SIZE,
        NodeKind::Leaf => COMMON_HEADER_SIZE,
    }
}

/// Bytes taken by one interval inside a node.
pub fn interval_size(interval: &StateInterval) -> usize {
    INTERVAL_HEADER_SIZE
        + match interval.value() {
            StateValue::Null => 0,
            StateValue::Int(_) => 4,
            StateValue::Long(_) | StateValue::Double(_) => 8,
            StateValue::String(s) => 2 + s.len(),
        }
}

#[derive(Debug, Clone)]
pub struct HtNode {
    kind: NodeKind,
    block_size: usize,
    max_children: usize,
    seq: i32,
    parent_seq: i32,
    start: i64,
    end: i64,
    done: bool,
    intervals: Vec<StateInterval>,
    used: usize,
    children: SmallVec<[ChildEntry; 8]>,
}

impl HtNode {
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
            intervals: Vec::new(),
            used: 0,
            children: SmallVec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_core(&self) -> bool {
        self.kind == NodeKind::Core
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

    /// End time once the node is closed; an open node extends to the end of time.
    pub fn end(&self) -> i64 {
        if self.done { self.end } else { i64::MAX }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn intervals(&self) -> &[StateInterval] {
        &self.intervals
    }

    pub fn children(&self) -> &[ChildEntry] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn latest_child(&self) -> Option<ChildEntry> {
        self.children.last().copied()
    }

    pub fn free_space(&self) -> usize {
        self.block_size
            .saturating_sub(header_size(self.kind, self.max_children) + self.used)
    }

    /// Append an interval. Callers check the free space first and insert by non-decreasing end time.
    pub fn add_interval(&mut self, interval: StateInterval) {
        debug_assert!(interval_size(&interval) <= self.free_space());
        debug_assert!(
            self.intervals
                .last()
                .is_none_or(|last| last.end_time() <= interval.end_time())
        );
        self.used += interval_size(&interval);
        self.intervals.push(interval);
    }

    pub fn link_child(&mut self, seq: i32, start: i64) {
        debug_assert!(self.is_core() && self.children.len() < self.max_children);
        self.children.push(ChildEntry { seq, start });
    }

    /// Close the node at `end`. A node never ends before it starts.
    pub fn close(&mut self, end: i64) {
        self.end = end.max(self.start);
        self.done = true;
    }

    /// Sequence number of the child covering `t`: the last child starting at or before it.
    pub fn child_for(&self, t: i64) -> Option<i32> {
        let index = self.children.partition_point(|c| c.start <= t);
        index.checked_sub(1).map(|i| self.children[i].seq)
    }

    fn first_ending_at_or_after(&self, t: i64) -> usize {
        self.intervals.partition_point(|i| i.end_time() < t)
    }

    /// Write every interval of this node valid at `t` into its attribute's slot.
    pub fn write_info(&self, slots: &mut [Option<StateInterval>], t: i64) {
        let first = self.first_ending_at_or_after(t);
        for interval in &self.intervals[first..] {
            if interval.start_time() <= t {
                if let Some(slot) = slots.get_mut(interval.quark()) {
                    *slot = Some(interval.clone());
                }
            }
        }
    }

    pub fn relevant_interval(&self, t: i64, quark: usize) -> Option<&StateInterval> {
        let first = self.first_ending_at_or_after(t);
        self.intervals[first..]
            .iter()
            .find(|i| i.quark() == quark && i.start_time() <= t)
    }

    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.block_size);
        buf.put_u8(self.kind.tag());
        buf.put_i64_le(self.start);
        buf.put_i64_le(self.end);
        buf.put_i32_le(self.seq);
        buf.put_i32_le(self.parent_seq);
        buf.put_i32_le(self.intervals.len() as i32);
        buf.put_u8(u8::from(self.done));

        if self.is_core() {
            buf.put_i32_le(self.children.len() as i32);
            for i in 0..self.max_children {
                let entry = self.children.get(i).copied().unwrap_or(ChildEntry {
                    seq: -1,
                    start: 0,
                });
                buf.put_i32_le(entry.seq);
                buf.put_i64_le(entry.start);
            }
        }

        for interval in &self.intervals {
            encode_interval(&mut buf, interval)?;
        }

        if buf.len() > self.block_size {
            return Err(StratumError::InvalidInput(format!(
                "node {} overflows its {} byte block",
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

        let mut node = HtNode::new(kind, block_size, max_children, seq, parent_seq, start);
        node.end = end;
        node.done = done;

        if kind == NodeKind::Core {
            need(&buf, 4 + max_children * CHILD_ENTRY_SIZE)?;
            let child_count = buf.get_i32_le();
            if child_count < 0 || child_count as usize > max_children {
                return Err(StratumError::InvalidFormat(format!(
                    "node {} claims {} children",
                    seq, child_count
                )));
            }
            for i in 0..max_children {
                let entry = ChildEntry {
                    seq: buf.get_i32_le(),
                    start: buf.get_i64_le(),
                };
                if i < child_count as usize {
                    node.children.push(entry);
                }
            }
        }

        if count < 0 {
            return Err(StratumError::InvalidFormat(format!(
                "node {} claims {} intervals",
                seq, count
            )));
        }
        for _ in 0..count {
            let interval = decode_interval(&mut buf)?;
            node.used += interval_size(&interval);
            node.intervals.push(interval);
        }
        Ok(node)
    }
}

impl fmt::Display for HtNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            NodeKind::Core => "core",
            NodeKind::Leaf => "leaf",
        };
        write!(f, "node #{} ({}, parent #{}) [{}, ", self.seq, kind, self.parent_seq, self.start)?;
        if self.done {
            write!(f, "{}]", self.end)?;
        } else {
            f.write_str("...]")?;
        }
        write!(f, " {} intervals", self.intervals.len())?;
        if self.is_core() {
            write!(f, ", children:")?;
            for child in &self.children {
                write!(f, " #{}@{}", child.seq, child.start)?;
            }
        }
        Ok(())
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(StratumError::InvalidFormat(
            "node block is truncated".to_string(),
        ));
    }
    Ok(())
}

fn encode_interval(buf: &mut BytesMut, interval: &StateInterval) -> Result<()> {
    let quark = i32::try_from(interval.quark()).map_err(|_| {
        StratumError::InvalidInput(format!(
            "attribute {} cannot be stored in a history file",
            interval.quark()
        ))
    })?;
    buf.put_i64_le(interval.start_time());
    buf.put_i64_le(interval.end_time());
    buf.put_i32_le(quark);
    buf.put_i8(interval.value().value_type().disk_tag());
    match interval.value() {
        StateValue::Null => {}
        StateValue::Int(v) => buf.put_i32_le(*v),
        StateValue::Long(v) => buf.put_i64_le(*v),
        StateValue::Double(v) => buf.put_f64_le(*v),
        StateValue::String(s) => {
            let len = u16::try_from(s.len()).map_err(|_| {
                StratumError::InvalidInput(format!(
                    "string value of {} bytes is too long for a history file",
                    s.len()
                ))
            })?;
            buf.put_u16_le(len);
            buf.put_slice(s.as_bytes());
        }
    }
    Ok(())
}

fn decode_interval(buf: &mut &[u8]) -> Result<StateInterval> {
    need(buf, INTERVAL_HEADER_SIZE)?;
    let start = buf.get_i64_le();
    let end = buf.get_i64_le();
    let quark = buf.get_i32_le();
    let tag = buf.get_i8();
    if start > end || quark < 0 {
        return Err(StratumError::InvalidFormat(format!(
            "corrupted interval [{}, {}] for attribute {}",
            start, end, quark
        )));
    }
    let value_type = StateValueType::from_disk_tag(tag)
        .ok_or_else(|| StratumError::InvalidFormat(format!("unknown value type tag {}", tag)))?;
    let value = match value_type {
        StateValueType::Null => StateValue::Null,
        StateValueType::Int => {
            need(buf, 4)?;
            StateValue::Int(buf.get_i32_le())
        }
        StateValueType::Long => {
            need(buf, 8)?;
            StateValue::Long(buf.get_i64_le())
        }
        StateValueType::Double => {
            need(buf, 8)?;
            StateValue::Double(buf.get_f64_le())
        }
        StateValueType::String => {
            need(buf, 2)?;
            let len = buf.get_u16_le() as usize;
            need(buf, len)?;
            let text = std::str::from_utf8(&buf[..len]).map_err(|e| {
                StratumError::InvalidFormat(format!("string value is not UTF-8: {}", e))
            })?;
            let value = StateValue::from(text);
            buf.advance(len);
            value
        }
    };
    Ok(StateInterval::new(start, end, quark as usize, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> HtNode {
        HtNode::new(NodeKind::Leaf, 4096, 4, 3, 1, 100)
    }

    #[test]
    fn test_block_roundtrip() {
        let mut node = leaf();
        node.add_interval(StateInterval::new(100, 110, 0, StateValue::Int(1)));
        node.add_interval(StateInterval::new(100, 120, 1, "running".into()));
        node.add_interval(StateInterval::new(105, 130, 2, StateValue::Double(0.5)));
        node.add_interval(StateInterval::new(101, 130, 3, StateValue::Null));
        node.close(130);

        let block = node.encode().unwrap();
        assert_eq!(block.len(), 4096);
        let decoded = HtNode::decode(&block, 4096, 4).unwrap();
        assert_eq!(decoded.seq(), 3);
        assert_eq!(decoded.parent_seq(), 1);
        assert_eq!(decoded.end(), 130);
        assert_eq!(decoded.intervals(), node.intervals());
        assert_eq!(decoded.free_space(), node.free_space());
    }

    #[test]
    fn test_core_children() {
        let mut core = HtNode::new(NodeKind::Core, 4096, 4, 0, -1, 0);
        core.link_child(1, 0);
        core.link_child(2, 51);
        core.link_child(5, 90);
        assert_eq!(core.child_for(0), Some(1));
        assert_eq!(core.child_for(50), Some(1));
        assert_eq!(core.child_for(51), Some(2));
        assert_eq!(core.child_for(1000), Some(5));
        assert_eq!(core.child_for(-1), None);

        let decoded = HtNode::decode(&core.encode().unwrap(), 4096, 4).unwrap();
        assert_eq!(decoded.children(), core.children());
        assert!(!decoded.is_done());
    }

    #[test]
    fn test_write_info() {
        let mut node = leaf();
        node.add_interval(StateInterval::new(100, 109, 0, StateValue::Int(1)));
        node.add_interval(StateInterval::new(100, 115, 1, StateValue::Int(2)));
        node.add_interval(StateInterval::new(110, 120, 0, StateValue::Int(3)));

        let mut slots: Vec<Option<StateInterval>> = vec![None; 2];
        node.write_info(&mut slots, 112);
        assert_eq!(slots[0].as_ref().unwrap().value(), &StateValue::Int(3));
        assert_eq!(slots[1].as_ref().unwrap().value(), &StateValue::Int(2));
        assert!(node.relevant_interval(116, 1).is_none());
        assert_eq!(node.relevant_interval(109, 0).unwrap().end_time(), 109);
    }

    #[test]
    fn test_truncated_block_is_rejected() {
        let mut node = leaf();
        node.add_interval(StateInterval::new(100, 110, 0, "abc".into()));
        let block = node.encode().unwrap();
        assert!(matches!(
            HtNode::decode(&block[..40], 4096, 4),
            Err(StratumError::InvalidFormat(_))
        ));
        assert!(HtNode::decode(&[9u8; 64], 4096, 4).is_err());
    }
}
