// RibSim: Data Plane Fixed-Point Simulator written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Interning of immutable values.
//!
//! Interning is purely a memory optimization: a value that could not be interned (because the
//! cache is full of live entries) is simply allocated on its own. Equality never depends on
//! whether two values share an allocation.

use std::{
    collections::HashSet,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
};

use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::BgpAttributes;

/// Maximum number of entries of the global BGP attribute cache.
const BGP_ATTRIBUTES_CAPACITY: usize = 1 << 20;

lazy_static! {
    static ref BGP_ATTRIBUTES: InternCache<BgpAttributes> =
        InternCache::new(BGP_ATTRIBUTES_CAPACITY);
}

/// Minimal number of misses between two sweeps.
const MIN_SWEEP_INTERVAL: usize = 1024;

/// A bounded, thread-safe interning cache. Entries that are no longer referenced outside of the
/// cache are evicted in sweeps. A sweep runs once the number of misses since the last sweep reaches
/// the number of entries that survived it, so each sweep is paid for by as many misses as it scans.
#[derive(Debug)]
pub struct InternCache<T> {
    state: Mutex<CacheState<T>>,
    capacity: usize,
}

#[derive(Debug)]
struct CacheState<T> {
    entries: HashSet<Arc<T>>,
    /// Misses since the last sweep that were not cached, because the cache was full.
    uncached: usize,
    /// Sweep when `entries.len() + uncached` reaches this value.
    sweep_at: usize,
}

impl<T: Hash + Eq> CacheState<T> {
    fn sweep(&mut self, capacity: usize) {
        self.entries.retain(|e| Arc::strong_count(e) > 1);
        self.uncached = 0;
        self.sweep_at = next_sweep(self.entries.len(), capacity);
    }
}

fn next_sweep(live: usize, capacity: usize) -> usize {
    live + live.max(MIN_SWEEP_INTERVAL.min(capacity)).max(1)
}

impl<T: Hash + Eq> InternCache<T> {
    /// Create an empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashSet::new(),
                uncached: 0,
                sweep_at: next_sweep(0, capacity),
            }),
            capacity,
        }
    }

    /// Return the shared instance equal to `value`, inserting it if it does not exist yet. If the
    /// cache is full of live entries, `value` is returned without being cached.
    pub fn intern(&self, value: T) -> Arc<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(shared) = state.entries.get(&value) {
            return shared.clone();
        }
        if state.entries.len() + state.uncached >= state.sweep_at {
            state.sweep(self.capacity);
        }
        let value = Arc::new(value);
        if state.entries.len() < self.capacity {
            state.entries.insert(value.clone());
        } else {
            state.uncached += 1;
        }
        value
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Intern a BGP attribute bundle in the global cache.
pub fn interned_bgp_attributes(attrs: BgpAttributes) -> Arc<BgpAttributes> {
    BGP_ATTRIBUTES.intern(attrs.seal())
}

/// Serialize the bundle by value, and intern it again when deserializing.
pub(super) mod serde_interned {
    use super::*;

    pub fn serialize<S: Serializer>(
        attrs: &Arc<BgpAttributes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        attrs.as_ref().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Arc<BgpAttributes>, D::Error> {
        BgpAttributes::deserialize(deserializer).map(interned_bgp_attributes)
    }
}
