//! GPU object lifetime primitives.
//!
//! Every GPU-visible object (buffer, texture, sampler, view) carries an
//! explicit reference count. The count starts at 1 on construction; each
//! strong holder calls [`GpuResource::add_reference`] once and
//! [`GpuResource::release`] exactly once. When `release` drops the count to
//! zero the object's `destroy` hook runs exactly once, which routes the
//! backend handle through the deferred-destroy queue so in-flight command
//! buffers never observe a dangling handle.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Unique identity of a GPU object.
///
/// Identities are never reused, so a recreated view with the same backing
/// texture produces a different render-target cache key than its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for diagnostics.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Reference count shared by every GPU-visible object.
///
/// The count starts at 1 for the creating holder.
#[derive(Debug)]
pub struct RefCount {
    count: AtomicU32,
}

impl RefCount {
    /// Create a count holding one reference.
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(1),
        }
    }

    /// Increment the count, returning the new value.
    pub fn retain(&self) -> u32 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the count. Returns `true` exactly once, when the count
    /// reaches zero.
    ///
    /// Releasing past zero is a caller bug; it is absorbed (the count
    /// saturates at zero) and logged rather than wrapping around.
    pub fn release(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                log::error!("release() called on a GPU object with zero references");
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current == 1,
                Err(observed) => current = observed,
            }
        }
    }

    /// Current reference count.
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifetime contract shared by every GPU-visible object.
pub trait GpuResource {
    /// Unique identity of this object.
    fn id(&self) -> ObjectId;

    /// The object's reference count.
    fn ref_count(&self) -> &RefCount;

    /// Backend teardown hook, dispatched exactly once when the reference
    /// count reaches zero. Implementations must be idempotent against the
    /// drop path (take the backend handle out of an `Option`).
    fn destroy(&self);

    /// Add a strong reference.
    fn add_reference(&self) {
        self.ref_count().retain();
    }

    /// Release a strong reference, destroying the object when the count
    /// reaches zero.
    fn release(&self) {
        if self.ref_count().release() {
            self.destroy();
        }
    }

    /// Current reference count, for diagnostics and tests.
    fn references(&self) -> u32 {
        self.ref_count().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        id: ObjectId,
        refs: RefCount,
        destroyed: AtomicUsize,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                id: ObjectId::next(),
                refs: RefCount::new(),
                destroyed: AtomicUsize::new(0),
            }
        }
    }

    impl GpuResource for Probe {
        fn id(&self) -> ObjectId {
            self.id
        }

        fn ref_count(&self) -> &RefCount {
            &self.refs
        }

        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_destroy_called_exactly_once() {
        let probe = Probe::new();
        assert_eq!(probe.references(), 1);

        probe.add_reference();
        assert_eq!(probe.references(), 2);

        probe.release();
        assert_eq!(probe.references(), 1);
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 0);

        probe.release();
        assert_eq!(probe.references(), 0);
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_past_zero_is_absorbed() {
        let probe = Probe::new();
        probe.release();
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 1);

        // A second release must neither underflow nor destroy again.
        probe.release();
        assert_eq!(probe.references(), 0);
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_object_ids_are_unique() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }
}
