// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 quay developers

//! Shared-memory region bookkeeping.
//!
//! Regions travel by handle: the descriptor carries `(handle, len)` and
//! never copies region bytes inline. The registry tracks which handles
//! are valid and pins a region while a message referencing it is in
//! flight, so `release` cannot pull memory out from under a peer.
//! Mapping the memory itself is the embedder's concern.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};

struct RegionState {
    len: u32,
    pinned: AtomicU32,
}

/// Registry of shareable memory regions, keyed by handle
#[derive(Default)]
pub struct ShmRegistry {
    regions: DashMap<u64, RegionState>,
    next_handle: AtomicU64,
}

impl ShmRegistry {
    pub fn new() -> Self {
        Self {
            regions: DashMap::new(),
            // Handle 0 stays invalid so a zeroed descriptor never resolves.
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register a region of `len` bytes and return its handle
    pub fn register(&self, len: u32) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.regions.insert(handle, RegionState {
            len,
            pinned: AtomicU32::new(0),
        });
        handle
    }

    /// Declared byte size of a registered region
    pub fn region_len(&self, handle: u64) -> Result<u32> {
        self.regions
            .get(&handle)
            .map(|state| state.len)
            .ok_or(Error::ShmRegionUnknown(handle))
    }

    /// Pin a region for the duration of an in-flight message. The guard
    /// unpins on drop.
    pub fn pin(self: &Arc<Self>, handle: u64) -> Result<ShmPin> {
        let state = self
            .regions
            .get(&handle)
            .ok_or(Error::ShmRegionUnknown(handle))?;
        state.pinned.fetch_add(1, Ordering::AcqRel);
        Ok(ShmPin {
            registry: Arc::clone(self),
            handle,
        })
    }

    /// Unregister a region. Fails while any message referencing it is
    /// still in flight.
    pub fn release(&self, handle: u64) -> Result<()> {
        // Entry-based removal keeps the pin check and the removal atomic.
        match self.regions.remove_if(&handle, |_, state| {
            state.pinned.load(Ordering::Acquire) == 0
        }) {
            Some(_) => Ok(()),
            None if self.regions.contains_key(&handle) => Err(Error::ShmRegionBusy(handle)),
            None => Err(Error::ShmRegionUnknown(handle)),
        }
    }

    fn unpin(&self, handle: u64) {
        if let Some(state) = self.regions.get(&handle) {
            state.pinned.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// RAII pin on a shared-memory region
pub struct ShmPin {
    registry: Arc<ShmRegistry>,
    handle: u64,
}

impl ShmPin {
    pub fn handle(&self) -> u64 {
        self.handle
    }
}

impl fmt::Debug for ShmPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmPin").field("handle", &self.handle).finish()
    }
}

impl Drop for ShmPin {
    fn drop(&mut self) {
        self.registry.unpin(self.handle);
    }
}
