// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Per-worker object pools.
//!
//! A [`MemoryPool`] is a slab of fixed-size slots owned by exactly one
//! worker. Slots are addressed by small indices ([`SlotId`]), which is
//! also how pooled list nodes reference each other; no pointers, no
//! aliasing hazards, and a trivial whole-pool reset.
//!
//! Capacity grows on demand and never shrinks while the pool lives.
//! If growth fails at the allocator, [`MemoryPool::acquire`] returns
//! `None` and the caller must treat that as "drop the packet".

/// Index of a slot within one pool.
pub type SlotId = u32;

const POOL_DEF_CAPACITY: usize = 32;

#[derive(Debug)]
enum Slot<T> {
    Free { next: Option<SlotId> },
    Used(T),
}

#[derive(Debug)]
pub struct MemoryPool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<SlotId>,
    in_use: usize,
}

impl<T> MemoryPool<T> {
    pub fn new() -> Self {
        Self::with_capacity(POOL_DEF_CAPACITY)
    }

    pub fn with_capacity(cap: usize) -> Self {
        let mut pool =
            Self { slots: Vec::new(), free_head: None, in_use: 0 };
        // A failed initial reservation is deferred: the pool simply
        // starts empty and the first acquire tries again.
        let _ = pool.grow(cap.max(1));
        pool
    }

    /// Take a slot and place `val` in it. Returns `None` when the
    /// pool cannot grow; the caller must drop the packet it is
    /// working on.
    #[must_use]
    pub fn acquire(&mut self, val: T) -> Option<SlotId> {
        if self.free_head.is_none() {
            let want = self.slots.len().max(1);
            self.grow(want)?;
        }

        let id = self.free_head?;
        let slot = &mut self.slots[id as usize];
        let next = match slot {
            Slot::Free { next } => *next,
            Slot::Used(_) => unreachable!("free list points at used slot"),
        };
        *slot = Slot::Used(val);
        self.free_head = next;
        self.in_use += 1;
        Some(id)
    }

    /// Return a slot to the free list, yielding its value.
    pub fn release(&mut self, id: SlotId) -> T {
        let slot = &mut self.slots[id as usize];
        let prev =
            core::mem::replace(slot, Slot::Free { next: self.free_head });
        match prev {
            Slot::Used(val) => {
                self.free_head = Some(id);
                self.in_use -= 1;
                val
            }
            Slot::Free { .. } => panic!("double release of slot {}", id),
        }
    }

    pub fn get(&self, id: SlotId) -> &T {
        match &self.slots[id as usize] {
            Slot::Used(val) => val,
            Slot::Free { .. } => panic!("access of free slot {}", id),
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> &mut T {
        match &mut self.slots[id as usize] {
            Slot::Used(val) => val,
            Slot::Free { .. } => panic!("access of free slot {}", id),
        }
    }

    /// The number of slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn grow(&mut self, additional: usize) -> Option<()> {
        if self.slots.try_reserve(additional).is_err() {
            return None;
        }

        let start = self.slots.len();
        for i in 0..additional {
            let next = if i + 1 < additional {
                Some((start + i + 1) as SlotId)
            } else {
                self.free_head
            };
            self.slots.push(Slot::Free { next });
        }
        self.free_head = Some(start as SlotId);
        Some(())
    }
}

impl<T> Default for MemoryPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
