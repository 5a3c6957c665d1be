// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The per-packet edit log.
//!
//! While a packet travels between the ingress and egress boundary
//! elements, every byte insertion or removal performed on its payload
//! is recorded here as an [`Edit`]. At egress the log is committed
//! into the flow's sequence map in one pass and the nodes returned to
//! the worker's pool. The log lives exactly as long as one packet.
//!
//! Positions are payload-relative: an edit at position `p` applies at
//! byte `p` of this packet's payload as it looked on ingress.

use super::pool::MemoryPool;
use super::pool::SlotId;
use super::seq_map::SeqMap;

/// One recorded edit: `delta` bytes inserted (positive) or removed
/// (negative) at payload position `pos`.
#[derive(Clone, Copy, Debug)]
pub struct Edit {
    pub pos: u32,
    pub delta: i32,
    next: Option<SlotId>,
}

/// The edit log of a single in-flight packet.
///
/// Nodes are pool slots linked by index, kept sorted by position.
/// After [`EditList::commit`] has run the list refuses further edits;
/// the caller must forward the packet unmodified for that edit.
#[derive(Clone, Copy, Debug, Default)]
pub struct EditList {
    head: Option<SlotId>,
    len: usize,
    committed: bool,
}

impl EditList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Record an edit of `delta` bytes at payload position `pos`.
    ///
    /// Returns `false` when the log has already been committed (the
    /// edit is not recorded) or when the node pool is exhausted.
    /// A zero delta records nothing.
    #[must_use]
    pub fn add(
        &mut self,
        pool: &mut MemoryPool<Edit>,
        pos: u32,
        delta: i32,
    ) -> bool {
        if self.committed {
            return false;
        }

        if delta == 0 {
            return true;
        }

        // Sorted insert: before the first node with a larger
        // position, so a same-position edit lands adjacent to its
        // sibling and the merge pass below can see it.
        let mut prev: Option<SlotId> = None;
        let mut cur = self.head;
        while let Some(id) = cur {
            let node = pool.get(id);
            if node.pos > pos {
                break;
            }
            prev = Some(id);
            cur = node.next;
        }

        let Some(new_id) = pool.acquire(Edit { pos, delta, next: cur })
        else {
            return false;
        };

        match prev {
            Some(p) => pool.get_mut(p).next = Some(new_id),
            None => self.head = Some(new_id),
        }
        self.len += 1;

        self.merge_nodes(pool);
        true
    }

    /// Fold adjacent same-position nodes.
    ///
    /// Same-sign pairs coalesce into one node holding the summed
    /// delta; opposite signs partially cancel, and a node whose delta
    /// reaches zero is dropped.
    fn merge_nodes(&mut self, pool: &mut MemoryPool<Edit>) {
        let mut prev: Option<SlotId> = None;
        let mut cur = self.head;

        while let Some(id) = cur {
            let node = *pool.get(id);
            let Some(next_id) = node.next else { break };
            let next = *pool.get(next_id);

            if node.pos == next.pos {
                let sum = node.delta + next.delta;
                let _ = pool.release(next_id);
                self.len -= 1;

                if sum == 0 {
                    // Both edits annihilate; unlink this node too.
                    let after = next.next;
                    let _ = pool.release(id);
                    self.len -= 1;
                    match prev {
                        Some(p) => pool.get_mut(p).next = after,
                        None => self.head = after,
                    }
                    cur = after;
                } else {
                    let n = pool.get_mut(id);
                    n.delta = sum;
                    n.next = next.next;
                    // Stay on this node: another same-position
                    // sibling may follow.
                }
            } else {
                prev = cur;
                cur = node.next;
            }
        }
    }

    /// Commit every recorded edit into `map`, translating payload
    /// positions to sequence space by `seq_base` (the segment's
    /// original sequence number). Returns the net byte delta.
    ///
    /// The nodes are returned to the pool and the list latches
    /// committed; any later [`EditList::add`] is refused.
    pub fn commit(
        &mut self,
        pool: &mut MemoryPool<Edit>,
        map: &mut SeqMap,
        seq_base: u32,
    ) -> i32 {
        let mut net = 0;
        let mut cur = self.head;

        while let Some(id) = cur {
            let node = pool.release(id);
            map.insert(seq_base.wrapping_add(node.pos), node.delta);
            net += node.delta;
            cur = node.next;
        }

        self.head = None;
        self.len = 0;
        self.committed = true;
        net
    }

    /// Return all nodes to the pool. The committed latch is left
    /// as-is.
    pub fn clear(&mut self, pool: &mut MemoryPool<Edit>) {
        let mut cur = self.head;
        while let Some(id) = cur {
            cur = pool.release(id).next;
        }
        self.head = None;
        self.len = 0;
    }

    /// Snapshot the list as `(pos, delta)` pairs.
    pub fn entries(&self, pool: &MemoryPool<Edit>) -> Vec<(u32, i32)> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(id) = cur {
            let node = pool.get(id);
            out.push((node.pos, node.delta));
            cur = node.next;
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sorted_insert() {
        let mut pool = MemoryPool::new();
        let mut list = EditList::new();

        assert!(list.add(&mut pool, 20, 4));
        assert!(list.add(&mut pool, 5, -2));
        assert!(list.add(&mut pool, 11, 3));
        assert_eq!(list.entries(&pool), vec![(5, -2), (11, 3), (20, 4)]);
    }

    #[test]
    fn same_sign_merge() {
        let mut pool = MemoryPool::new();
        let mut list = EditList::new();

        assert!(list.add(&mut pool, 10, 4));
        assert!(list.add(&mut pool, 10, 2));
        assert_eq!(list.entries(&pool), vec![(10, 6)]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn opposite_sign_cancel() {
        let mut pool = MemoryPool::new();
        let mut list = EditList::new();

        assert!(list.add(&mut pool, 10, 4));
        assert!(list.add(&mut pool, 10, -6));
        assert_eq!(list.entries(&pool), vec![(10, -2)]);

        assert!(list.add(&mut pool, 10, 2));
        assert!(list.entries(&pool).is_empty());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn add_after_commit_refused() {
        let mut pool = MemoryPool::new();
        let mut map = SeqMap::new(1000);
        let mut list = EditList::new();

        assert!(list.add(&mut pool, 10, 4));
        let net = list.commit(&mut pool, &mut map, 1000);
        assert_eq!(net, 4);
        assert!(list.is_committed());
        assert!(!list.add(&mut pool, 12, 1));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn clear_returns_nodes() {
        let mut pool = MemoryPool::new();
        let mut list = EditList::new();

        assert!(list.add(&mut pool, 1, 1));
        assert!(list.add(&mut pool, 2, 2));
        assert_eq!(pool.in_use(), 2);
        list.clear(&mut pool);
        assert_eq!(pool.in_use(), 0);
        assert!(!list.is_committed());
    }
}
