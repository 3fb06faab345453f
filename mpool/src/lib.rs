//! A fixed-capacity, reference-counted block pool allocator.
//!
//! Blocks are allocated out of a pre-sized arena rather than the global
//! allocator: the route table, cache, and dataservice layers in
//! `bpcore-bpa` allocate every bundle, canonical block, subqueue entry, and
//! reference out of one of these pools so that a node's steady-state memory
//! footprint is bounded and independent of traffic bursts.
//!
//! The pool carves a [`Pool::with_capacity`]-sized [`Vec`] of slots up front.
//! Freed slots are pushed onto a LIFO free list; [`BlockId`] pairs a slot
//! index with a generation counter so a stale handle to a recycled slot is
//! rejected rather than silently aliasing a new block (the arena-plus-
//! generation idiom stands in for the original implementation's tagged
//! pointers, which Rust's ownership model has no use for).
//!
//! Two intrusive concerns live alongside the arena: [`list`] threads
//! doubly-linked lists of blocks through the slots themselves (the admin
//! block's recycle queue, an interface's active-job list, a block's
//! encoded-chunk chain all reuse the same prev/next fields), and
//! [`reference`] implements the reference-counted handle semantics
//! (`ref_create`/`ref_duplicate`/`ref_release`) blocks use to point at each
//! other without the pool itself needing to know what a "bundle" or
//! "canonical block" is.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::vec::Vec;

pub mod list;
pub mod lock;
pub mod reference;

pub use lock::ResourceLocks;

use thiserror::Error;

/// A handle to a block: an arena index paired with a generation counter.
///
/// Equality and the generation check are the whole of this crate's
/// use-after-recycle defence: once a slot is recycled its generation is
/// bumped, so a [`BlockId`] captured before the recycle fails every
/// subsequent lookup with [`Error::StaleHandle`] instead of resolving to
/// whatever was allocated into the slot afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

impl BlockId {
    /// The raw arena index, stable for the lifetime of this generation.
    /// Useful as the `resource_addr` key for [`lock::ResourceLocks`].
    pub fn resource_addr(&self) -> u64 {
        ((self.index as u64) << 32) | self.generation as u64
    }
}

/// Relative scheduling priority recorded at allocation time.
///
/// Mirrors the priority argument threaded through the route table and
/// dataservice send paths so a block's place in a subqueue can be decided
/// without re-deriving urgency from its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A blocktype signature, used only to detect duplicate type registration
/// and to report which constructor's content a block carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub u32);

/// Errors returned by pool operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("pool exhausted: no free blocks")]
    PoolExhausted,
    #[error("requested content exceeds block capacity")]
    ContentTooLarge,
    #[error("blocktype signature {0:?} already registered")]
    DuplicateSignature(Signature),
    #[error("block handle is stale (slot was recycled)")]
    StaleHandle,
    #[error("block has live references and cannot be recycled")]
    ReferencesOutstanding,
}

/// Content a pool slot carries while allocated.
///
/// Implemented by the caller's block-content type (e.g. `bpcore-bpa`'s
/// bundle/canonical-block/subqueue-entry union). [`Content::recycle_children`]
/// is this crate's equivalent of the original allocator's per-blocktype
/// destructor: it runs once, during [`Pool::maintain`], and is handed a
/// [`RecycleCtx`] so it can recursively recycle any sub-lists or referenced
/// blocks it owns before the slot is wiped and returned to the free list.
pub trait Content: Sized {
    fn recycle_children(self, ctx: &mut RecycleCtx<'_, Self>);
}

struct Slot<T> {
    generation: u32,
    refcount: u32,
    priority: Priority,
    signature: Option<Signature>,
    prev: Option<BlockId>,
    next: Option<BlockId>,
    body: Option<T>,
}

impl<T> Slot<T> {
    fn empty(generation: u32) -> Self {
        Self {
            generation,
            refcount: 0,
            priority: Priority::Normal,
            signature: None,
            prev: None,
            next: None,
            body: None,
        }
    }
}

/// A fixed-capacity block arena.
///
/// All mutating operations (`alloc`, `recycle`, list moves) take `&mut self`:
/// the spec's "one pool lock guards all admin mutation" contract is upheld by
/// callers sharing a `Pool` behind [`bpcore_async::sync::spin::Mutex`] rather
/// than by this type doing its own internal locking, since every mutation
/// here is O(1) and fits the spinlock's hot-path contract.
pub struct Pool<T: Content> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    recycle_queue: Vec<BlockId>,
    type_registry: hashbrown::HashMap<Signature, ()>,
}

/// A scoped handle into a [`Pool`] passed to [`Content::recycle_children`],
/// exposing only the subset of pool operations safe to call while a block's
/// destructor is running: recycling owned children and releasing references.
pub struct RecycleCtx<'a, T: Content> {
    pool: &'a mut Pool<T>,
}

impl<'a, T: Content> RecycleCtx<'a, T> {
    /// Detaches `block` from any list it's on and appends it to the recycle
    /// queue, as if the caller had called [`Pool::recycle`] directly.
    pub fn recycle(&mut self, block: BlockId) -> Result<(), Error> {
        self.pool.recycle(block)
    }

    pub fn ref_release(&mut self, r: BlockId) -> Result<(), Error> {
        self.pool.ref_release(r)
    }

    /// Reads another block's content by id, e.g. so a destructor can follow
    /// a back-reference it carries rather than only touching its own target.
    pub fn get(&self, id: BlockId) -> Result<&T, Error> {
        self.pool.get(id)
    }

    /// Mutates another block's content by id. See [`RecycleCtx::get`].
    pub fn get_mut(&mut self, id: BlockId) -> Result<&mut T, Error> {
        self.pool.get_mut(id)
    }
}

impl<T: Content> Pool<T> {
    /// Carves a pool able to hold exactly `capacity` blocks. The original
    /// allocator carves a contiguous byte region into fixed-size blocks and
    /// reserves one as an admin block; here `capacity` counts caller-visible
    /// blocks only; the recycle queue and type registry are ordinary `Vec`s
    /// allocated alongside the pool rather than a distinguished slot, since
    /// Rust's allocator gives us dynamically sized bookkeeping for free.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            recycle_queue: Vec::new(),
            type_registry: hashbrown::HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a blocktype signature so a second registration can be
    /// rejected with [`Error::DuplicateSignature`], matching the original
    /// allocator's "registering a duplicate blocktype signature fails with
    /// DUPLICATE" failure mode.
    pub fn register_type(&mut self, sig: Signature) -> Result<(), Error> {
        if self.type_registry.insert(sig, ()).is_some() {
            return Err(Error::DuplicateSignature(sig));
        }
        Ok(())
    }

    /// Removes a block from the free list, tags it, and runs `init` to
    /// populate its content.
    ///
    /// The original allocator hands a failed construction's block back to
    /// the caller uninspected, since its content is just bytes the caller
    /// can choose to recycle or repair. `T` has no such uninitialized state
    /// to hand back here, so on `Err` the slot is returned to the free list
    /// immediately and only the constructor's error is surfaced; there is no
    /// stranded handle for the caller to decide about.
    #[cfg_attr(feature = "instrument", tracing::instrument(level = "trace", skip(self, init)))]
    pub fn alloc<E>(
        &mut self,
        sig: Signature,
        priority: Priority,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<Result<BlockId, E>, Error> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() == self.slots.capacity() {
                    return Err(Error::PoolExhausted);
                }
                let index = self.slots.len() as u32;
                self.slots.push(Slot::empty(0));
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.refcount = 0;
        slot.priority = priority;
        slot.signature = Some(sig);
        slot.prev = None;
        slot.next = None;

        match init() {
            Ok(body) => {
                slot.body = Some(body);
                tracing::trace!(index, generation = slot.generation, "allocated block");
                Ok(Ok(BlockId {
                    index,
                    generation: slot.generation,
                }))
            }
            Err(e) => {
                slot.signature = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
                Ok(Err(e))
            }
        }
    }

    fn resolve(&self, id: BlockId) -> Result<usize, Error> {
        let slot = self
            .slots
            .get(id.index as usize)
            .ok_or(Error::StaleHandle)?;
        if slot.generation != id.generation || slot.body.is_none() {
            return Err(Error::StaleHandle);
        }
        Ok(id.index as usize)
    }

    pub fn get(&self, id: BlockId) -> Result<&T, Error> {
        let i = self.resolve(id)?;
        Ok(self.slots[i].body.as_ref().unwrap())
    }

    pub fn get_mut(&mut self, id: BlockId) -> Result<&mut T, Error> {
        let i = self.resolve(id)?;
        Ok(self.slots[i].body.as_mut().unwrap())
    }

    pub fn refcount(&self, id: BlockId) -> Result<u32, Error> {
        let i = self.resolve(id)?;
        Ok(self.slots[i].refcount)
    }

    pub fn priority(&self, id: BlockId) -> Result<Priority, Error> {
        let i = self.resolve(id)?;
        Ok(self.slots[i].priority)
    }

    /// Detaches `block` from whatever list it's linked into and appends it to
    /// the recycle queue. The block's refcount must be zero.
    #[cfg_attr(feature = "instrument", tracing::instrument(level = "trace", skip(self)))]
    pub fn recycle(&mut self, block: BlockId) -> Result<(), Error> {
        let i = self.resolve(block)?;
        if self.slots[i].refcount != 0 {
            return Err(Error::ReferencesOutstanding);
        }
        list::unlink(self, block)?;
        self.recycle_queue.push(block);
        Ok(())
    }

    /// Drains the recycle queue: for each queued block, runs
    /// [`Content::recycle_children`] (which may itself queue further blocks,
    /// e.g. a canonical-block list or a held reference target), then wipes
    /// the slot and returns it to the free list.
    ///
    /// Draining continues until the queue is empty, including entries pushed
    /// by `recycle_children` during this same call, so a chain of nested
    /// references collapses in one `maintain` pass.
    #[cfg_attr(feature = "instrument", tracing::instrument(level = "debug", skip(self)))]
    pub fn maintain(&mut self) {
        let mut drained = 0usize;
        while let Some(id) = self.recycle_queue.pop() {
            let Ok(i) = self.resolve_for_maintain(id) else {
                continue;
            };
            let Some(body) = self.slots[i].body.take() else {
                continue;
            };
            let mut ctx = RecycleCtx { pool: self };
            body.recycle_children(&mut ctx);

            let slot = &mut self.slots[id.index as usize];
            slot.signature = None;
            slot.refcount = 0;
            slot.prev = None;
            slot.next = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            drained += 1;
        }
        tracing::debug!(drained, "recycle queue drained");
    }

    fn resolve_for_maintain(&self, id: BlockId) -> Result<usize, Error> {
        let slot = self
            .slots
            .get(id.index as usize)
            .ok_or(Error::StaleHandle)?;
        if slot.generation != id.generation {
            return Err(Error::StaleHandle);
        }
        Ok(id.index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Payload {
        Leaf(u32),
        Ref(BlockId),
    }

    impl Content for Payload {
        fn recycle_children(self, ctx: &mut RecycleCtx<'_, Self>) {
            if let Payload::Ref(target) = self {
                ctx.ref_release(target).unwrap();
            }
        }
    }

    const SIG_LEAF: Signature = Signature(1);

    #[test]
    fn alloc_recycle_roundtrip() {
        let mut pool: Pool<Payload> = Pool::with_capacity(4);
        let a = pool
            .alloc::<core::convert::Infallible>(SIG_LEAF, Priority::Normal, || Ok(Payload::Leaf(7)))
            .unwrap()
            .unwrap();
        assert_eq!(*pool.get(a).unwrap(), Payload::Leaf(7));
        pool.recycle(a).unwrap();
        pool.maintain();
        assert!(pool.get(a).is_err());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn pool_exhaustion() {
        let mut pool: Pool<Payload> = Pool::with_capacity(1);
        pool.alloc::<core::convert::Infallible>(SIG_LEAF, Priority::Normal, || Ok(Payload::Leaf(1)))
            .unwrap()
            .unwrap();
        let err = pool
            .alloc::<core::convert::Infallible>(SIG_LEAF, Priority::Normal, || Ok(Payload::Leaf(2)))
            .unwrap_err();
        assert_eq!(err, Error::PoolExhausted);
    }

    #[test]
    fn stale_handle_rejected_after_recycle() {
        let mut pool: Pool<Payload> = Pool::with_capacity(2);
        let a = pool
            .alloc::<core::convert::Infallible>(SIG_LEAF, Priority::Normal, || Ok(Payload::Leaf(1)))
            .unwrap()
            .unwrap();
        pool.recycle(a).unwrap();
        pool.maintain();
        let b = pool
            .alloc::<core::convert::Infallible>(SIG_LEAF, Priority::Normal, || Ok(Payload::Leaf(2)))
            .unwrap()
            .unwrap();
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert!(pool.get(a).is_err());
        assert_eq!(*pool.get(b).unwrap(), Payload::Leaf(2));
    }

    #[test]
    fn recycle_refuses_live_refcount() {
        let mut pool: Pool<Payload> = Pool::with_capacity(2);
        let a = pool
            .alloc::<core::convert::Infallible>(SIG_LEAF, Priority::Normal, || Ok(Payload::Leaf(1)))
            .unwrap()
            .unwrap();
        pool.ref_create(a).unwrap();
        assert_eq!(pool.recycle(a), Err(Error::ReferencesOutstanding));
    }

    #[test]
    fn duplicate_type_registration_fails() {
        let mut pool: Pool<Payload> = Pool::with_capacity(2);
        pool.register_type(SIG_LEAF).unwrap();
        assert_eq!(
            pool.register_type(SIG_LEAF),
            Err(Error::DuplicateSignature(SIG_LEAF))
        );
    }
}
