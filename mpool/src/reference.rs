//! Reference-counted handles over pool blocks.
//!
//! `ref_create`/`ref_duplicate`/`ref_release` are the whole of this crate's
//! memory-safety contract for cross-block pointers: the count of live
//! references to a block equals its refcount exactly, and a block with a
//! nonzero refcount is never recycled (`Pool::recycle` enforces this
//! directly). Unlike `Rc`/`Arc`, the refcount lives in the pool's `Slot`
//! rather than beside the pointee, since any number of unrelated blocks
//! (subqueue entries, the cache's primary-block index, another reference)
//! may all point at the same target by `BlockId` alone.

use crate::{BlockId, Content, Error, Pool};

impl<T: Content> Pool<T> {
    /// Increments `target`'s refcount. Returns `target` unchanged: the
    /// "reference" *is* the target's `BlockId` plus the bumped count: unlike
    /// the block-pool union this crate generalizes, there is no separate
    /// reference-typed block to allocate for a plain refcount bump.
    pub fn ref_create(&mut self, target: BlockId) -> Result<BlockId, Error> {
        let i = self.resolve_for_maintain(target)?;
        self.slots[i].refcount += 1;
        Ok(target)
    }

    /// Increments `target`'s refcount again, for a second independent owner
    /// of the same reference.
    pub fn ref_duplicate(&mut self, target: BlockId) -> Result<BlockId, Error> {
        self.ref_create(target)
    }

    /// Decrements `target`'s refcount and, if it reaches zero, recycles it.
    pub fn ref_release(&mut self, target: BlockId) -> Result<(), Error> {
        let i = self.resolve_for_maintain(target)?;
        if self.slots[i].refcount == 0 {
            return Err(Error::StaleHandle);
        }
        self.slots[i].refcount -= 1;
        if self.slots[i].refcount == 0 {
            self.recycle(target)?;
        }
        Ok(())
    }

    /// Allocates a typed wrapper block suitable for insertion into a
    /// subqueue, whose own `recycle_children` (via `body`'s
    /// [`Content::recycle_children`] impl) is expected to call
    /// [`Pool::ref_release`] on `target` so the wrapper's lifetime and the
    /// underlying reference's lifetime stay in lock-step. The pool makes no
    /// attempt to enforce that `body` actually does so; the contract is
    /// documented, not mechanically checked, matching the allocator this
    /// crate generalizes.
    pub fn make_block<E>(
        &mut self,
        sig: crate::Signature,
        priority: crate::Priority,
        target: BlockId,
        init: impl FnOnce(BlockId) -> Result<T, E>,
    ) -> Result<Result<BlockId, E>, Error> {
        self.ref_create(target)?;
        let result = self.alloc(sig, priority, || init(target));
        if !matches!(result, Ok(Ok(_))) {
            let _ = self.ref_release(target);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Body {
        Leaf,
        Wrapper(BlockId),
    }

    impl Content for Body {
        fn recycle_children(self, ctx: &mut crate::RecycleCtx<'_, Self>) {
            if let Body::Wrapper(target) = self {
                ctx.ref_release(target).unwrap();
            }
        }
    }

    #[test]
    fn release_to_zero_recycles_target() {
        let mut pool: Pool<Body> = Pool::with_capacity(4);
        let target = pool
            .alloc::<core::convert::Infallible>(crate::Signature(1), crate::Priority::Normal, || {
                Ok(Body::Leaf)
            })
            .unwrap()
            .unwrap();
        pool.ref_create(target).unwrap();
        assert_eq!(pool.refcount(target).unwrap(), 1);
        pool.ref_release(target).unwrap();
        pool.maintain();
        assert!(pool.get(target).is_err());
    }

    #[test]
    fn make_block_destructor_releases_target() {
        let mut pool: Pool<Body> = Pool::with_capacity(4);
        let target = pool
            .alloc::<core::convert::Infallible>(crate::Signature(1), crate::Priority::Normal, || {
                Ok(Body::Leaf)
            })
            .unwrap()
            .unwrap();
        let wrapper = pool
            .make_block::<core::convert::Infallible>(
                crate::Signature(2),
                crate::Priority::Normal,
                target,
                |t| Ok(Body::Wrapper(t)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(pool.refcount(target).unwrap(), 1);

        pool.recycle(wrapper).unwrap();
        pool.maintain();
        assert!(pool.get(wrapper).is_err());
        assert!(pool.get(target).is_err());
    }
}
