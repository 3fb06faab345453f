//! The node's single block pool and the tagged content union stored in it.
//!
//! Every bundle, subqueue entry, and cache index node the BPA touches is
//! allocated out of one [`Pool`], mirroring the block pool's role as the
//! sole allocator for the whole node rather than a per-subsystem cache.
//! [`Block`] is the Rust rendering of the original allocator's content
//! union: a tagged enum instead of a raw union, with [`bpcore_mpool::Content::recycle_children`]
//! standing in for the per-blocktype destructor table.

use bpcore_bpv7::bundle::Bundle;
use bpcore_mpool::{BlockId, Content, RecycleCtx, Signature};

use crate::cache::{CacheEntry, Delivery};

pub const SIG_LIST_HEAD: Signature = bpcore_mpool::list::LIST_HEAD;
pub const SIG_BUNDLE: Signature = Signature(1);
pub const SIG_QUEUE_ENTRY: Signature = Signature(2);
pub const SIG_CACHE_ENTRY: Signature = Signature(3);

/// The tagged content a pool slot carries.
pub enum Block {
    /// A sentinel anchoring an intrusive list (a subqueue, the recycle
    /// queue, an interface's active-job list).
    ListHead,
    /// A decoded bundle together with its encoded payload bytes, stored once
    /// and referenced from both the cache's indices and any number of
    /// interface subqueues via [`Block::QueueEntry`]. `delivery` is stamped
    /// by whoever completes an egress attempt for this bundle, read back by
    /// [`crate::cache::on_queue_entry_recycled`] once the last subqueue
    /// wrapper referencing it is recycled.
    Bundle {
        bundle: Box<Bundle>,
        payload: Box<[u8]>,
        delivery: Delivery,
    },
    /// A typed reference wrapper suitable for insertion into a subqueue; its
    /// destructor releases the underlying [`Block::Bundle`] reference,
    /// matching `make_block`'s contract in `bpcore-mpool`. `cache_entry`, if
    /// set, names the [`Block::CacheEntry`] that queued this bundle, so the
    /// destructor can report the delivery outcome back to it.
    QueueEntry {
        target: BlockId,
        cache_entry: Option<BlockId>,
    },
    /// A cache entry: FSM state, flags, timers, and the three R-B tree
    /// index links, plus a reference to the [`Block::Bundle`] it indexes
    /// (or none while offloaded).
    CacheEntry(CacheEntry),
}

impl Content for Block {
    fn recycle_children(self, ctx: &mut RecycleCtx<'_, Self>) {
        match self {
            Block::QueueEntry { target, cache_entry } => {
                if let Some(cache_entry) = cache_entry {
                    crate::cache::on_queue_entry_recycled(ctx, cache_entry, target);
                }
                let _ = ctx.ref_release(target);
            }
            Block::CacheEntry(entry) => {
                if let Some(bundle_ref) = entry.bundle_ref {
                    let _ = ctx.ref_release(bundle_ref);
                }
            }
            Block::ListHead | Block::Bundle { .. } => {}
        }
    }
}

pub type Pool = bpcore_mpool::Pool<Block>;

pub fn new_pool(capacity: usize) -> Pool {
    let mut pool = Pool::with_capacity(capacity);
    // Registration failures here would only occur on programmer error (the
    // same signature registered twice), so `new_pool` is infallible from the
    // caller's point of view.
    for sig in [SIG_LIST_HEAD, SIG_BUNDLE, SIG_QUEUE_ENTRY, SIG_CACHE_ENTRY] {
        pool.register_type(sig)
            .expect("bpa block signatures are registered exactly once");
    }
    pool
}
