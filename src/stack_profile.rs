//! Interning of stack frames and callsites.
//!
//! A frame is `(mapping, relative pc)`; a callsite is `(parent, frame, depth)`
//! forming a path from the stack root. Interning the same chain twice yields
//! the same callsite ids, so repeated samples of one stack cost nothing
//! beyond the first.

use std::collections::HashMap;

use crate::mapping::MappingId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallsiteId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub mapping: MappingId,
    pub rel_pc: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callsite {
    pub parent: Option<CallsiteId>,
    pub frame: FrameId,
    pub depth: u32,
}

#[derive(Default)]
pub struct StackProfileTracker {
    frames: Vec<Frame>,
    frame_index: HashMap<(MappingId, u64), FrameId>,
    callsites: Vec<Callsite>,
    callsite_index: HashMap<(Option<CallsiteId>, FrameId, u32), CallsiteId>,
}

impl StackProfileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_frame(&mut self, mapping: MappingId, rel_pc: u64) -> FrameId {
        if let Some(&id) = self.frame_index.get(&(mapping, rel_pc)) {
            return id;
        }
        let id = FrameId(self.frames.len() as u32);
        self.frames.push(Frame { mapping, rel_pc });
        self.frame_index.insert((mapping, rel_pc), id);
        id
    }

    pub fn intern_callsite(
        &mut self,
        parent: Option<CallsiteId>,
        frame: FrameId,
        depth: u32,
    ) -> CallsiteId {
        if let Some(&id) = self.callsite_index.get(&(parent, frame, depth)) {
            return id;
        }
        let id = CallsiteId(self.callsites.len() as u32);
        self.callsites.push(Callsite {
            parent,
            frame,
            depth,
        });
        self.callsite_index.insert((parent, frame, depth), id);
        id
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0 as usize]
    }

    pub fn callsite(&self, id: CallsiteId) -> &Callsite {
        &self.callsites[id.0 as usize]
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn callsite_count(&self) -> usize {
        self.callsites.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interning_dedups() {
        let mut tracker = StackProfileTracker::new();
        let a = tracker.intern_frame(MappingId(1), 0x10);
        let b = tracker.intern_frame(MappingId(1), 0x10);
        let c = tracker.intern_frame(MappingId(1), 0x20);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(tracker.frame_count(), 2);
    }

    #[test]
    fn test_callsite_chain() {
        let mut tracker = StackProfileTracker::new();
        let frame = tracker.intern_frame(MappingId(0), 0x10);
        let root = tracker.intern_callsite(None, frame, 0);
        let child = tracker.intern_callsite(Some(root), frame, 1);
        assert_eq!(tracker.callsite(child).parent, Some(root));
        assert_eq!(tracker.callsite(child).depth, 1);
        assert_eq!(tracker.callsite(root).parent, None);
    }

    #[test]
    fn test_callsite_interning_dedups() {
        let mut tracker = StackProfileTracker::new();
        let frame = tracker.intern_frame(MappingId(0), 0x10);
        let a = tracker.intern_callsite(None, frame, 0);
        let b = tracker.intern_callsite(None, frame, 0);
        assert_eq!(a, b);
        assert_eq!(tracker.callsite_count(), 1);
    }
}
