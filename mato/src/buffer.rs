//! Payload descriptor arena and reference-count bookkeeping (spec §3 "Payload
//! descriptor", §4.3 C3).
//!
//! Grounded in `original_source/mato/mato_core.h`'s `channel_data` struct
//! and `decrement_references`/`borrow_last_data_of_channel`. The raw
//! pointer + manual refcount of the C source is replaced by the Design
//! Notes' suggested "arena of payload descriptors addressed by stable
//! indices" so that a [`Borrowed`] handle can never be mismatched against
//! the wrong descriptor and a stale id from a disconnected node's
//! descriptor simply fails the `contains_key` check instead of dangling.

use std::sync::Arc;

/// A stable handle to one live payload descriptor. Never reused for the
/// lifetime of the process (ids are drawn from a monotone counter), so a
/// stale id is always detectable rather than silently aliasing a new
/// descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub(crate) u64);

/// A payload handed to a `borrowed`-kind subscriber, or returned by
/// [`crate::Framework::borrow_data`]. Must eventually be passed to
/// [`crate::Framework::release_data`].
#[derive(Clone)]
pub struct Borrowed {
    pub(crate) id: DescriptorId,
    pub(crate) bytes: Arc<Vec<u8>>,
}

impl Borrowed {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub(crate) struct Descriptor {
    pub owner_node: u32,
    pub owner_module: u32,
    pub channel: u32,
    pub bytes: Arc<Vec<u8>>,
    pub refcount: i64,
}

/// Owns every live payload descriptor, keyed by stable id. Lives inside
/// [`crate::registry::Registry`] and is therefore always mutated under the
/// single framework mutex (spec §5).
#[derive(Default)]
pub(crate) struct BufferArena {
    next_id: u64,
    descriptors: std::collections::HashMap<u64, Descriptor>,
}

impl BufferArena {
    /// Inserts a freshly posted payload with `refcount = 0`, matching the
    /// table in spec §4.3 ("`post_data` enqueued: descriptor created with
    /// `refcount = 0`").
    pub fn insert(
        &mut self,
        owner_node: u32,
        owner_module: u32,
        channel: u32,
        bytes: Arc<Vec<u8>>,
    ) -> DescriptorId {
        let id = self.next_id;
        self.next_id += 1;
        self.descriptors.insert(
            id,
            Descriptor {
                owner_node,
                owner_module,
                channel,
                bytes,
                refcount: 0,
            },
        );
        DescriptorId(id)
    }

    pub fn get(&self, id: DescriptorId) -> Option<&Descriptor> {
        self.descriptors.get(&id.0)
    }

    /// Adds `delta` to a descriptor's refcount. Internal invariant
    /// violations (a refcount going negative, or a reference to a
    /// descriptor that no longer exists while one is still expected) are
    /// bugs, not runtime conditions (spec §7), so this asserts rather than
    /// returning a recoverable error.
    ///
    /// Returns `true` if the descriptor was freed as a result (refcount
    /// reached zero).
    pub fn add_ref(&mut self, id: DescriptorId, delta: i64) -> bool {
        let Some(desc) = self.descriptors.get_mut(&id.0) else {
            // Already freed by a racing decrement; nothing to do. This is
            // reachable (not a bug) because two independent paths may each
            // hold the last reference and decrement concurrently under the
            // same lock, one after the other.
            return false;
        };
        desc.refcount += delta;
        assert!(
            desc.refcount >= 0,
            "descriptor {} refcount went negative",
            id.0
        );
        if desc.refcount == 0 {
            self.descriptors.remove(&id.0);
            true
        } else {
            false
        }
    }

    pub fn bytes(&self, id: DescriptorId) -> Option<Arc<Vec<u8>>> {
        self.descriptors.get(&id.0).map(|d| d.bytes.clone())
    }

    pub fn contains(&self, id: DescriptorId) -> bool {
        self.descriptors.contains_key(&id.0)
    }

    /// Total count and summed refcount across every live descriptor of one
    /// module/channel — backs `buffer_usage` (`mato_data_buffer_usage`,
    /// SPEC_FULL.md §10).
    pub fn usage(&self, owner_module: u32, channel: u32) -> (usize, i64) {
        let mut count = 0usize;
        let mut total = 0i64;
        for d in self.descriptors.values() {
            if d.owner_module == owner_module && d.channel == channel {
                count += 1;
                total += d.refcount;
            }
        }
        (count, total)
    }

    /// Sum of refcounts across every live descriptor in the whole arena —
    /// used by tests asserting the "refcount sum reaches 0" end-of-run
    /// property (spec §8 scenario 1).
    #[cfg(test)]
    pub fn total_refcount(&self) -> i64 {
        self.descriptors.values().map(|d| d.refcount).sum()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_starts_at_zero_refcount() {
        let mut arena = BufferArena::default();
        let id = arena.insert(0, 1, 0, Arc::new(vec![1, 2, 3]));
        assert_eq!(arena.get(id).unwrap().refcount, 0);
    }

    #[test]
    fn add_ref_frees_at_zero() {
        let mut arena = BufferArena::default();
        let id = arena.insert(0, 1, 0, Arc::new(vec![1]));
        assert!(!arena.add_ref(id, 2));
        assert!(arena.contains(id));
        assert!(!arena.add_ref(id, -1));
        assert!(arena.contains(id));
        assert!(arena.add_ref(id, -1));
        assert!(!arena.contains(id));
    }

    #[test]
    #[should_panic]
    fn add_ref_asserts_on_negative() {
        let mut arena = BufferArena::default();
        let id = arena.insert(0, 1, 0, Arc::new(vec![1]));
        arena.add_ref(id, -1);
    }
}
