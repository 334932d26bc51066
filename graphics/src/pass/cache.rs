//! Render pass cache.
//!
//! A small fixed-capacity table of backend render passes keyed by the
//! load/store operations of every attachment. Misses on a full table evict the
//! least recently used slot.

use crate::backend::RenderPassHandle;
use crate::types::AttachmentOp;

/// Load/store operations of every attachment of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RenderPassKey {
    pub colors: Vec<AttachmentOp>,
    pub depth: AttachmentOp,
    pub stencil: AttachmentOp,
}

#[derive(Debug)]
struct CacheSlot {
    key: RenderPassKey,
    handle: RenderPassHandle,
    last_used: u64,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheLookup {
    pub handle: RenderPassHandle,
    /// Handle pushed out to make room. Still owned by the caller.
    pub evicted: Option<RenderPassHandle>,
    pub hit: bool,
}

#[derive(Debug)]
pub(crate) struct RenderPassCache {
    capacity: usize,
    tick: u64,
    slots: Vec<CacheSlot>,
}

impl RenderPassCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tick: 0,
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Look up `key`, building and inserting a render pass on a miss.
    ///
    /// A failed build leaves the cache untouched.
    pub fn get_or_insert_with<E>(
        &mut self,
        key: &RenderPassKey,
        build: impl FnOnce() -> Result<RenderPassHandle, E>,
    ) -> Result<CacheLookup, E> {
        self.tick += 1;
        let tick = self.tick;

        if let Some(slot) = self.slots.iter_mut().find(|slot| &slot.key == key) {
            slot.last_used = tick;
            return Ok(CacheLookup {
                handle: slot.handle,
                evicted: None,
                hit: true,
            });
        }

        let handle = build()?;
        let slot = CacheSlot {
            key: key.clone(),
            handle,
            last_used: tick,
        };

        let evicted = if self.slots.len() < self.capacity {
            self.slots.push(slot);
            None
        } else {
            let oldest = self
                .slots
                .iter_mut()
                .min_by_key(|slot| slot.last_used)
                .map(|oldest| std::mem::replace(oldest, slot));
            oldest.map(|old| old.handle)
        };

        Ok(CacheLookup {
            handle,
            evicted,
            hit: false,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Remove every slot, returning the handles.
    pub fn drain(&mut self) -> Vec<RenderPassHandle> {
        self.slots.drain(..).map(|slot| slot.handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ops: &[AttachmentOp]) -> RenderPassKey {
        RenderPassKey {
            colors: ops.to_vec(),
            depth: AttachmentOp::LOAD_STORE,
            stencil: AttachmentOp::LOAD_STORE,
        }
    }

    fn builder(next: &mut u64) -> impl FnOnce() -> Result<RenderPassHandle, ()> + '_ {
        move || {
            *next += 1;
            Ok(RenderPassHandle(*next))
        }
    }

    #[test]
    fn test_hit_returns_same_handle() {
        let mut cache = RenderPassCache::new(2);
        let mut next = 0;
        let a = key(&[AttachmentOp::CLEAR_STORE]);

        let first = cache.get_or_insert_with(&a, builder(&mut next)).unwrap();
        let second = cache.get_or_insert_with(&a, builder(&mut next)).unwrap();
        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(first.handle, second.handle);
        assert_eq!(next, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = RenderPassCache::new(2);
        let mut next = 0;
        let a = key(&[AttachmentOp::CLEAR_STORE]);
        let b = key(&[AttachmentOp::LOAD_STORE]);
        let c = key(&[AttachmentOp::DONT_CARE]);

        let ha = cache.get_or_insert_with(&a, builder(&mut next)).unwrap().handle;
        let hb = cache.get_or_insert_with(&b, builder(&mut next)).unwrap().handle;
        // Touch `a` so `b` becomes the oldest.
        cache.get_or_insert_with(&a, builder(&mut next)).unwrap();

        let hc = cache.get_or_insert_with(&c, builder(&mut next)).unwrap();
        assert_eq!(hc.evicted, Some(hb));
        assert_eq!(cache.len(), 2);

        let again = cache.get_or_insert_with(&a, builder(&mut next)).unwrap();
        assert!(again.hit);
        assert_eq!(again.handle, ha);

        let rebuilt = cache.get_or_insert_with(&b, builder(&mut next)).unwrap();
        assert!(!rebuilt.hit);
        assert_ne!(rebuilt.handle, hb);
    }

    #[test]
    fn test_failed_build_leaves_cache_untouched() {
        let mut cache = RenderPassCache::new(1);
        let result: Result<_, &str> =
            cache.get_or_insert_with(&key(&[AttachmentOp::LOAD_STORE]), || Err("boom"));
        assert!(result.is_err());
        assert_eq!(cache.len(), 0);
        assert!(cache.drain().is_empty());
    }
}
