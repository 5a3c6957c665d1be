// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Synchronization primitives.
//!
//! The engine holds exactly one lock on the packet path: the short-held
//! per-flow mutex guarding cross-direction state. [`KMutex`] wraps the
//! std mutex so the locking discipline has one named home and so an
//! embedding that supplies its own primitive has a single seam to
//! replace.

use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Mutex;

pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: std::sync::MutexGuard<'a, T>,
}

impl<T> KMutex<T> {
    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap()
    }

    /// Acquire the guard to gain access to the underlying value,
    /// blocking if it is currently held. The mutex is released when
    /// the guard is dropped.
    pub fn lock(&self) -> KMutexGuard<T> {
        let guard = self.inner.lock().unwrap();
        KMutexGuard { guard }
    }
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for KMutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "KMutex {{ .. }}")
    }
}
