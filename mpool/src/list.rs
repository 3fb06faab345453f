//! Intrusive doubly-linked lists threaded through pool slots.
//!
//! A list head is itself an ordinary allocated block (signature
//! [`LIST_HEAD`]) whose content is `()`-shaped as far as the list machinery
//! is concerned; what distinguishes it is that its `prev`/`next` slot fields
//! are wired into a circular list rather than left `None`. Any other block
//! in the same pool can be spliced into that list by the same two fields, so
//! the admin block's recycle queue, an interface's active-job list, and a
//! block's encoded-chunk chain all reuse this one mechanism instead of each
//! growing their own `Vec`.

use crate::{BlockId, Content, Error, Pool};

/// Reserved signature for list-head sentinels, matching the contract that
/// every list is anchored at a pool-allocated block.
pub const LIST_HEAD: crate::Signature = crate::Signature(0);

/// Creates a new empty list: a sentinel block whose `prev` and `next` both
/// point at itself.
pub fn new_list<T: Content>(pool: &mut Pool<T>, init: T) -> Result<BlockId, Error> {
    let head = pool
        .alloc::<core::convert::Infallible>(LIST_HEAD, crate::Priority::Normal, || Ok(init))?
        .unwrap();
    let i = head.index as usize;
    pool.slots[i].prev = Some(head);
    pool.slots[i].next = Some(head);
    Ok(head)
}

pub fn is_empty<T: Content>(pool: &Pool<T>, head: BlockId) -> Result<bool, Error> {
    let i = pool.resolve(head)?;
    Ok(pool.slots[i].next == Some(head))
}

/// Unlinks `block` from whatever list it's currently a member of, restoring
/// it to a standalone (`prev == next == None`) state. A no-op on a block
/// that isn't linked into anything.
pub fn unlink<T: Content>(pool: &mut Pool<T>, block: BlockId) -> Result<(), Error> {
    let i = pool.resolve_for_maintain(block)?;
    let (prev, next) = (pool.slots[i].prev, pool.slots[i].next);
    match (prev, next) {
        (Some(p), Some(n)) if p != block || n != block => {
            let pi = pool.resolve_for_maintain(p)?;
            pool.slots[pi].next = Some(n);
            let ni = pool.resolve_for_maintain(n)?;
            pool.slots[ni].prev = Some(p);
        }
        _ => {}
    }
    pool.slots[i].prev = None;
    pool.slots[i].next = None;
    Ok(())
}

/// Appends `block` to the tail of the list anchored at `head`.
pub fn push_back<T: Content>(
    pool: &mut Pool<T>,
    head: BlockId,
    block: BlockId,
) -> Result<(), Error> {
    unlink(pool, block)?;
    let hi = pool.resolve_for_maintain(head)?;
    let tail = pool.slots[hi].prev.unwrap_or(head);

    let ti = pool.resolve_for_maintain(tail)?;
    pool.slots[ti].next = Some(block);
    let bi = pool.resolve_for_maintain(block)?;
    pool.slots[bi].prev = Some(tail);
    pool.slots[bi].next = Some(head);
    let hi = pool.resolve_for_maintain(head)?;
    pool.slots[hi].prev = Some(block);
    Ok(())
}

/// Removes and returns the block at the head of the list, or `None` if
/// empty.
pub fn pop_front<T: Content>(pool: &mut Pool<T>, head: BlockId) -> Result<Option<BlockId>, Error> {
    let hi = pool.resolve(head)?;
    let front = pool.slots[hi].next;
    match front {
        Some(front) if front != head => {
            unlink(pool, front)?;
            Ok(Some(front))
        }
        _ => Ok(None),
    }
}

/// An iterator over a list's members, front to back. Does not include the
/// sentinel `head` block itself.
pub struct Iter<'a, T: Content> {
    pool: &'a Pool<T>,
    head: BlockId,
    cur: Option<BlockId>,
}

pub fn iter<T: Content>(pool: &Pool<T>, head: BlockId) -> Iter<'_, T> {
    let cur = pool.resolve(head).ok().and_then(|i| pool.slots[i].next);
    Iter { pool, head, cur }
}

impl<'a, T: Content> Iterator for Iter<'a, T> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let cur = self.cur?;
        if cur == self.head {
            return None;
        }
        let i = self.pool.resolve(cur).ok()?;
        self.cur = self.pool.slots[i].next;
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Leaf(u32);

    impl Content for Leaf {
        fn recycle_children(self, _ctx: &mut crate::RecycleCtx<'_, Self>) {}
    }

    #[test]
    fn push_back_preserves_order() {
        let mut pool: Pool<Leaf> = Pool::with_capacity(8);
        let head = new_list(&mut pool, Leaf(u32::MAX)).unwrap();
        let mut members = Vec::new();
        for v in [1u32, 2, 3] {
            let b = pool
                .alloc::<core::convert::Infallible>(crate::Signature(1), crate::Priority::Normal, || {
                    Ok(Leaf(v))
                })
                .unwrap()
                .unwrap();
            push_back(&mut pool, head, b).unwrap();
            members.push(b);
        }

        let seen: Vec<u32> = iter(&pool, head).map(|id| pool.get(id).unwrap().0).collect();
        assert_eq!(seen, vec![1, 2, 3]);

        let front = pop_front(&mut pool, head).unwrap().unwrap();
        assert_eq!(front, members[0]);
        let seen: Vec<u32> = iter(&pool, head).map(|id| pool.get(id).unwrap().0).collect();
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn empty_list_pops_none() {
        let mut pool: Pool<Leaf> = Pool::with_capacity(4);
        let head = new_list(&mut pool, Leaf(0)).unwrap();
        assert!(is_empty(&pool, head).unwrap());
        assert_eq!(pop_front(&mut pool, head).unwrap(), None);
    }
}
