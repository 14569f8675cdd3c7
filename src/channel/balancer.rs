//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Balancing strategies over the ready subchannel set.

use super::subchannel::Subchannel;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The balancing strategy of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Balancer {
    /// Iterate the ready set in a stable order.
    #[default]
    RoundRobin,
    /// Pick uniformly at random from the ready set.
    Random,
    /// Consistent choice by a caller-supplied key (a [`BalancerKey`]
    /// context value).
    Hash,
    /// Single endpoint, no balancing.
    Direct,
    /// Exclusive lease on a subchannel until the pick is dropped.
    Claim,
}

/// The hashing key for the [`Balancer::Hash`] strategy, supplied as a
/// context value.
///
/// # Examples
///
/// ```rust
/// use h2rpc::channel::BalancerKey;
/// use h2rpc::context::Context;
///
/// let ctx = Context::background().with_value(BalancerKey::new("tenant-42"));
/// assert_eq!(ctx.value::<BalancerKey>().unwrap().key(), "tenant-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerKey(String);

impl BalancerKey {
    /// Creates a balancer key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key value.
    pub fn key(&self) -> &str {
        &self.0
    }
}

/// A picked subchannel, carrying the claim lease when the `claim`
/// strategy is in use.
///
/// Dropping the pick releases the lease.
pub struct PickedSubchannel {
    subchannel: Subchannel,
    claimed: bool,
}

impl PickedSubchannel {
    pub(crate) fn new(subchannel: Subchannel, claimed: bool) -> Self {
        Self {
            subchannel,
            claimed,
        }
    }

    /// The selected subchannel.
    pub fn subchannel(&self) -> &Subchannel {
        &self.subchannel
    }
}

impl std::fmt::Debug for PickedSubchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickedSubchannel")
            .field("endpoint", self.subchannel.endpoint())
            .field("claimed", &self.claimed)
            .finish()
    }
}

impl Drop for PickedSubchannel {
    fn drop(&mut self) {
        if self.claimed {
            self.subchannel.release_claim();
        }
    }
}

/// Stable round-robin cursor over `len` ready subchannels.
pub(crate) fn round_robin_index(cursor: &AtomicUsize, len: usize) -> usize {
    cursor.fetch_add(1, Ordering::Relaxed) % len
}

/// Uniform choice over `len` ready subchannels.
pub(crate) fn random_index(len: usize) -> usize {
    use rand::Rng;
    rand::thread_rng().gen_range(0..len)
}

/// Consistent choice of a key over `len` ready subchannels.
pub(crate) fn hash_index(key: &str, len: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % len as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_fairness() {
        // Over N ready subchannels, any N consecutive picks visit each
        // exactly once.
        let cursor = AtomicUsize::new(0);
        for len in [1usize, 3, 5] {
            for _round in 0..4 {
                let mut seen = vec![0u32; len];
                for _ in 0..len {
                    seen[round_robin_index(&cursor, len)] += 1;
                }
                assert!(seen.iter().all(|&count| count == 1), "len {}", len);
            }
        }
    }

    #[test]
    fn test_random_in_range() {
        for _ in 0..100 {
            assert!(random_index(4) < 4);
        }
    }

    #[test]
    fn test_hash_consistent() {
        let a = hash_index("tenant-1", 8);
        for _ in 0..10 {
            assert_eq!(hash_index("tenant-1", 8), a);
        }
        assert!(a < 8);
    }
}
