/*!
An intrusive, allocator-agnostic red-black tree index over 63-bit unsigned
keys.

This crate owns no storage of its own: the caller supplies a [`NodeStore`]
over its own node representation (e.g. a cache entry embedded in a memory
pool block) and a small, self-referential handle type. The tree itself is
just a root handle plus the standard red-black insert/delete fix-up
algorithms, following Cormen/Leiserson/Rivest/Stein's formulation so that
arbitrary nodes (not just keys) can be removed in `O(log n)` via
[`Tree::extract_node`] without a second search from the root.

As in the system this crate's contract is modelled on, the key's top bit is
conceptually "stolen" to store the node's colour; this crate does not pack
colour into the key itself (the [`NodeStore`] trait exposes colour as its own
accessor), but callers embedding a tree node in a compact record may choose to
pack it that way internally. Keys must fit in 63 bits; [`Tree::insert`]
rejects anything outside that range.
*/

#![cfg_attr(not(feature = "std"), no_std)]

use thiserror::Error;

/// Errors returned by tree operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `insert` was called with a key that already exists in a tree that does
    /// not allow duplicate keys.
    #[error("duplicate key")]
    Duplicate,

    /// A key outside the 63-bit range (the top bit is reserved) was supplied.
    #[error("key {0:#x} does not fit in 63 bits")]
    KeyTooLarge(u64),

    /// A black-height or colour invariant was violated (debug builds only).
    #[error("red-black tree invariant violated: {0}")]
    InvariantViolation(&'static str),
}

/// The 63-bit key mask; bit 63 is reserved (mirrors the "stolen sign bit"
/// colour-packing trick described in the system this crate indexes for).
pub const KEY_MASK: u64 = (1u64 << 63) - 1;

/// A node's colour in the red-black tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    Red,
    #[default]
    Black,
}

/// Storage accessors for an intrusive red-black tree node.
///
/// Implement this over whatever arena/pool holds the actual node data; the
/// tree only ever manipulates handles.
pub trait NodeStore {
    /// An opaque handle identifying a node. Typically an arena index.
    type Handle: Copy + Eq;

    fn key(&self, h: Self::Handle) -> u64;
    fn color(&self, h: Self::Handle) -> Color;
    fn set_color(&mut self, h: Self::Handle, c: Color);
    fn parent(&self, h: Self::Handle) -> Option<Self::Handle>;
    fn set_parent(&mut self, h: Self::Handle, p: Option<Self::Handle>);
    fn left(&self, h: Self::Handle) -> Option<Self::Handle>;
    fn set_left(&mut self, h: Self::Handle, c: Option<Self::Handle>);
    fn right(&self, h: Self::Handle) -> Option<Self::Handle>;
    fn set_right(&mut self, h: Self::Handle, c: Option<Self::Handle>);
}

/// A red-black tree index, holding only its root handle.
///
/// Set `allow_duplicates` for the cache's time and destination-EID indices:
/// on a key collision, the new node is always inserted to the right of any
/// equal-keyed node, so ordering among equal keys is unspecified and such
/// indices must only ever be scanned by range, never probed by exact key.
#[derive(Debug, Clone, Copy)]
pub struct Tree<H> {
    root: Option<H>,
    allow_duplicates: bool,
}

impl<H: Copy + Eq> Default for Tree<H> {
    fn default() -> Self {
        Self {
            root: None,
            allow_duplicates: false,
        }
    }
}

impl<H: Copy + Eq> Tree<H> {
    /// Creates an empty tree that rejects duplicate keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree that allows duplicate keys, using the
    /// "always-go-right" comparator for the cache's non-unique indices.
    pub fn new_allow_duplicates() -> Self {
        Self {
            root: None,
            allow_duplicates: true,
        }
    }

    pub fn root(&self) -> Option<H> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Searches for a node with an exact key match.
    ///
    /// Meaningless on a duplicate-allowing tree beyond "some node with this
    /// key exists"; such indices should be scanned with [`Tree::goto_min`]
    /// instead.
    pub fn search<S>(&self, store: &S, key: u64) -> Option<H>
    where
        S: NodeStore<Handle = H>,
    {
        let mut cur = self.root;
        while let Some(h) = cur {
            let k = store.key(h);
            cur = match key.cmp(&k) {
                core::cmp::Ordering::Equal => return Some(h),
                core::cmp::Ordering::Less => store.left(h),
                core::cmp::Ordering::Greater => store.right(h),
            };
        }
        None
    }

    /// Inserts `node` (already populated with `key` via the store) into the
    /// tree. Fails with [`Error::Duplicate`] if an equal key already exists
    /// in a non-duplicate tree.
    pub fn insert<S>(&mut self, store: &mut S, key: u64, node: H) -> Result<(), Error>
    where
        S: NodeStore<Handle = H>,
    {
        if key & !KEY_MASK != 0 {
            return Err(Error::KeyTooLarge(key));
        }

        store.set_left(node, None);
        store.set_right(node, None);
        store.set_parent(node, None);
        store.set_color(node, Color::Red);

        let mut parent = None;
        let mut cur = self.root;
        let mut go_left = false;
        while let Some(h) = cur {
            parent = Some(h);
            let k = store.key(h);
            go_left = if self.allow_duplicates {
                key < k
            } else {
                match key.cmp(&k) {
                    core::cmp::Ordering::Equal => return Err(Error::Duplicate),
                    core::cmp::Ordering::Less => true,
                    core::cmp::Ordering::Greater => false,
                }
            };
            cur = if go_left { store.left(h) } else { store.right(h) };
        }

        store.set_parent(node, parent);
        match parent {
            None => self.root = Some(node),
            Some(p) if go_left => store.set_left(p, Some(node)),
            Some(p) => store.set_right(p, Some(node)),
        }

        self.insert_fixup(store, node);
        Ok(())
    }

    /// Removes a node found by other means (e.g. a direct handle held by a
    /// cache entry), in `O(log n)` without re-searching by key.
    pub fn extract_node<S>(&mut self, store: &mut S, z: H)
    where
        S: NodeStore<Handle = H>,
    {
        let mut y = z;
        let mut y_original_color = store.color(y);
        let x: Option<H>;
        let x_parent: Option<H>;

        if store.left(z).is_none() {
            x = store.right(z);
            x_parent = store.parent(z);
            self.transplant(store, z, store.right(z));
        } else if store.right(z).is_none() {
            x = store.left(z);
            x_parent = store.parent(z);
            self.transplant(store, z, store.left(z));
        } else {
            y = Self::minimum(store, store.right(z).unwrap());
            y_original_color = store.color(y);
            let x_inner = store.right(y);
            if store.parent(y) == Some(z) {
                x_parent = Some(y);
            } else {
                x_parent = store.parent(y);
                self.transplant(store, y, store.right(y));
                store.set_right(y, store.right(z));
                store.set_parent(store.right(y).unwrap(), Some(y));
            }
            self.transplant(store, z, Some(y));
            store.set_left(y, store.left(z));
            store.set_parent(store.left(y).unwrap(), Some(y));
            store.set_color(y, store.color(z));
            x = x_inner;
        }

        store.set_left(z, None);
        store.set_right(z, None);
        store.set_parent(z, None);

        if matches!(y_original_color, Color::Black) {
            self.delete_fixup(store, x, x_parent);
        }
    }

    fn transplant<S>(&mut self, store: &mut S, u: H, v: Option<H>)
    where
        S: NodeStore<Handle = H>,
    {
        match store.parent(u) {
            None => self.root = v,
            Some(p) if store.left(p) == Some(u) => store.set_left(p, v),
            Some(p) => store.set_right(p, v),
        }
        if let Some(v) = v {
            store.set_parent(v, store.parent(u));
        }
    }

    fn minimum<S>(store: &S, mut h: H) -> H
    where
        S: NodeStore<Handle = H>,
    {
        while let Some(l) = store.left(h) {
            h = l;
        }
        h
    }

    fn maximum<S>(store: &S, mut h: H) -> H
    where
        S: NodeStore<Handle = H>,
    {
        while let Some(r) = store.right(h) {
            h = r;
        }
        h
    }

    fn rotate_left<S>(&mut self, store: &mut S, x: H)
    where
        S: NodeStore<Handle = H>,
    {
        let y = store.right(x).expect("rotate_left requires a right child");
        store.set_right(x, store.left(y));
        if let Some(yl) = store.left(y) {
            store.set_parent(yl, Some(x));
        }
        store.set_parent(y, store.parent(x));
        match store.parent(x) {
            None => self.root = Some(y),
            Some(p) if store.left(p) == Some(x) => store.set_left(p, Some(y)),
            Some(p) => store.set_right(p, Some(y)),
        }
        store.set_left(y, Some(x));
        store.set_parent(x, Some(y));
    }

    fn rotate_right<S>(&mut self, store: &mut S, x: H)
    where
        S: NodeStore<Handle = H>,
    {
        let y = store.left(x).expect("rotate_right requires a left child");
        store.set_left(x, store.right(y));
        if let Some(yr) = store.right(y) {
            store.set_parent(yr, Some(x));
        }
        store.set_parent(y, store.parent(x));
        match store.parent(x) {
            None => self.root = Some(y),
            Some(p) if store.left(p) == Some(x) => store.set_left(p, Some(y)),
            Some(p) => store.set_right(p, Some(y)),
        }
        store.set_right(y, Some(x));
        store.set_parent(x, Some(y));
    }

    fn insert_fixup<S>(&mut self, store: &mut S, mut z: H)
    where
        S: NodeStore<Handle = H>,
    {
        while let Some(p) = store.parent(z) {
            if matches!(store.color(p), Color::Black) {
                break;
            }
            let Some(gp) = store.parent(p) else { break };
            if Some(p) == store.left(gp) {
                let uncle = store.right(gp);
                if uncle.is_some_and(|u| matches!(store.color(u), Color::Red)) {
                    store.set_color(p, Color::Black);
                    store.set_color(uncle.unwrap(), Color::Black);
                    store.set_color(gp, Color::Red);
                    z = gp;
                } else {
                    if Some(z) == store.right(p) {
                        z = p;
                        self.rotate_left(store, z);
                    }
                    let p = store.parent(z).unwrap();
                    let gp = store.parent(p).unwrap();
                    store.set_color(p, Color::Black);
                    store.set_color(gp, Color::Red);
                    self.rotate_right(store, gp);
                }
            } else {
                let uncle = store.left(gp);
                if uncle.is_some_and(|u| matches!(store.color(u), Color::Red)) {
                    store.set_color(p, Color::Black);
                    store.set_color(uncle.unwrap(), Color::Black);
                    store.set_color(gp, Color::Red);
                    z = gp;
                } else {
                    if Some(z) == store.left(p) {
                        z = p;
                        self.rotate_right(store, z);
                    }
                    let p = store.parent(z).unwrap();
                    let gp = store.parent(p).unwrap();
                    store.set_color(p, Color::Black);
                    store.set_color(gp, Color::Red);
                    self.rotate_left(store, gp);
                }
            }
        }
        if let Some(r) = self.root {
            store.set_color(r, Color::Black);
        }
    }

    fn node_color<S>(store: &S, h: Option<H>) -> Color
    where
        S: NodeStore<Handle = H>,
    {
        match h {
            Some(h) => store.color(h),
            None => Color::Black,
        }
    }

    fn delete_fixup<S>(&mut self, store: &mut S, mut x: Option<H>, mut x_parent: Option<H>)
    where
        S: NodeStore<Handle = H>,
    {
        while x != self.root && matches!(Self::node_color(store, x), Color::Black) {
            let Some(p) = x_parent else { break };
            if x == store.left(p) {
                let mut w = store.right(p);
                if matches!(w, Some(wn) if matches!(store.color(wn), Color::Red)) {
                    let wn = w.unwrap();
                    store.set_color(wn, Color::Black);
                    store.set_color(p, Color::Red);
                    self.rotate_left(store, p);
                    w = store.right(p);
                }
                let w_black_children = w.map_or(true, |wn| {
                    matches!(Self::node_color(store, store.left(wn)), Color::Black)
                        && matches!(Self::node_color(store, store.right(wn)), Color::Black)
                });
                if w_black_children {
                    if let Some(wn) = w {
                        store.set_color(wn, Color::Red);
                    }
                    x = Some(p);
                    x_parent = store.parent(p);
                } else {
                    let wn = w.unwrap();
                    if matches!(Self::node_color(store, store.right(wn)), Color::Black) {
                        if let Some(wl) = store.left(wn) {
                            store.set_color(wl, Color::Black);
                        }
                        store.set_color(wn, Color::Red);
                        self.rotate_right(store, wn);
                        w = store.right(p);
                    }
                    let wn = w.unwrap();
                    store.set_color(wn, store.color(p));
                    store.set_color(p, Color::Black);
                    if let Some(wr) = store.right(wn) {
                        store.set_color(wr, Color::Black);
                    }
                    self.rotate_left(store, p);
                    x = self.root;
                    x_parent = None;
                }
            } else {
                let mut w = store.left(p);
                if matches!(w, Some(wn) if matches!(store.color(wn), Color::Red)) {
                    let wn = w.unwrap();
                    store.set_color(wn, Color::Black);
                    store.set_color(p, Color::Red);
                    self.rotate_right(store, p);
                    w = store.left(p);
                }
                let w_black_children = w.map_or(true, |wn| {
                    matches!(Self::node_color(store, store.left(wn)), Color::Black)
                        && matches!(Self::node_color(store, store.right(wn)), Color::Black)
                });
                if w_black_children {
                    if let Some(wn) = w {
                        store.set_color(wn, Color::Red);
                    }
                    x = Some(p);
                    x_parent = store.parent(p);
                } else {
                    let wn = w.unwrap();
                    if matches!(Self::node_color(store, store.left(wn)), Color::Black) {
                        if let Some(wr) = store.right(wn) {
                            store.set_color(wr, Color::Black);
                        }
                        store.set_color(wn, Color::Red);
                        self.rotate_left(store, wn);
                        w = store.left(p);
                    }
                    let wn = w.unwrap();
                    store.set_color(wn, store.color(p));
                    store.set_color(p, Color::Black);
                    if let Some(wl) = store.left(wn) {
                        store.set_color(wl, Color::Black);
                    }
                    self.rotate_right(store, p);
                    x = self.root;
                    x_parent = None;
                }
            }
        }
        if let Some(x) = x {
            store.set_color(x, Color::Black);
        }
    }

    /// Positions a cursor at the smallest key `>= lower_bound`.
    pub fn goto_min<S>(&self, store: &S, lower_bound: u64) -> Option<H>
    where
        S: NodeStore<Handle = H>,
    {
        let mut best = None;
        let mut cur = self.root;
        while let Some(h) = cur {
            if store.key(h) >= lower_bound {
                best = Some(h);
                cur = store.left(h);
            } else {
                cur = store.right(h);
            }
        }
        best
    }

    /// Positions a cursor at the largest key `<= upper_bound`.
    pub fn goto_max<S>(&self, store: &S, upper_bound: u64) -> Option<H>
    where
        S: NodeStore<Handle = H>,
    {
        let mut best = None;
        let mut cur = self.root;
        while let Some(h) = cur {
            if store.key(h) <= upper_bound {
                best = Some(h);
                cur = store.right(h);
            } else {
                cur = store.left(h);
            }
        }
        best
    }

    /// In-order successor of `h`.
    pub fn next<S>(&self, store: &S, h: H) -> Option<H>
    where
        S: NodeStore<Handle = H>,
    {
        if let Some(r) = store.right(h) {
            return Some(Self::minimum(store, r));
        }
        let mut cur = h;
        let mut p = store.parent(h);
        while let Some(pp) = p {
            if store.left(pp) == Some(cur) {
                return Some(pp);
            }
            cur = pp;
            p = store.parent(pp);
        }
        None
    }

    /// In-order predecessor of `h`.
    pub fn prev<S>(&self, store: &S, h: H) -> Option<H>
    where
        S: NodeStore<Handle = H>,
    {
        if let Some(l) = store.left(h) {
            return Some(Self::maximum(store, l));
        }
        let mut cur = h;
        let mut p = store.parent(h);
        while let Some(pp) = p {
            if store.right(pp) == Some(cur) {
                return Some(pp);
            }
            cur = pp;
            p = store.parent(pp);
        }
        None
    }

    /// Walks every root-to-leaf path, checking the standard red-black
    /// invariants (no red node has a red child; all paths carry equal black
    /// height). Returns the common black-height on success. Intended for use
    /// in debug assertions and tests, not the hot path.
    pub fn black_height<S>(&self, store: &S) -> Result<usize, Error>
    where
        S: NodeStore<Handle = H>,
    {
        fn walk<S: NodeStore>(store: &S, h: Option<S::Handle>) -> Result<usize, Error> {
            let Some(h) = h else { return Ok(1) };
            if matches!(store.color(h), Color::Red) {
                for child in [store.left(h), store.right(h)] {
                    if child.is_some_and(|c| matches!(store.color(c), Color::Red)) {
                        return Err(Error::InvariantViolation("red node has a red child"));
                    }
                }
            }
            let lh = walk(store, store.left(h))?;
            let rh = walk(store, store.right(h))?;
            if lh != rh {
                return Err(Error::InvariantViolation("unequal black height"));
            }
            Ok(lh + if matches!(store.color(h), Color::Black) { 1 } else { 0 })
        }
        walk(store, self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, Copy)]
    struct Node {
        key: u64,
        color: Color2,
        parent: Option<usize>,
        left: Option<usize>,
        right: Option<usize>,
    }

    #[derive(Default, Clone, Copy, PartialEq, Eq)]
    enum Color2 {
        #[default]
        Black,
        Red,
    }

    struct VecStore(Vec<Node>);

    impl NodeStore for VecStore {
        type Handle = usize;

        fn key(&self, h: usize) -> u64 {
            self.0[h].key
        }
        fn color(&self, h: usize) -> Color {
            match self.0[h].color {
                Color2::Red => Color::Red,
                Color2::Black => Color::Black,
            }
        }
        fn set_color(&mut self, h: usize, c: Color) {
            self.0[h].color = match c {
                Color::Red => Color2::Red,
                Color::Black => Color2::Black,
            };
        }
        fn parent(&self, h: usize) -> Option<usize> {
            self.0[h].parent
        }
        fn set_parent(&mut self, h: usize, p: Option<usize>) {
            self.0[h].parent = p;
        }
        fn left(&self, h: usize) -> Option<usize> {
            self.0[h].left
        }
        fn set_left(&mut self, h: usize, c: Option<usize>) {
            self.0[h].left = c;
        }
        fn right(&self, h: usize) -> Option<usize> {
            self.0[h].right
        }
        fn set_right(&mut self, h: usize, c: Option<usize>) {
            self.0[h].right = c;
        }
    }

    impl VecStore {
        fn push(&mut self, key: u64) -> usize {
            self.0.push(Node {
                key,
                ..Default::default()
            });
            self.0.len() - 1
        }
    }

    #[test]
    fn insert_and_iterate_ascending() {
        let mut store = VecStore(Vec::new());
        let mut tree = Tree::new();
        for key in [16, 8, 24, 4, 12, 20, 28] {
            let h = store.push(key);
            tree.insert(&mut store, key, h).unwrap();
        }

        let mut out = Vec::new();
        let mut cur = tree.goto_min(&store, 0);
        while let Some(h) = cur {
            out.push(store.key(h));
            cur = tree.next(&store, h);
        }
        assert_eq!(out, vec![4, 8, 12, 16, 20, 24, 28]);
        assert!(tree.black_height(&store).unwrap() >= 2);
    }

    #[test]
    fn duplicate_key_rejected_unless_allowed() {
        let mut store = VecStore(Vec::new());
        let mut tree = Tree::new();
        let a = store.push(5);
        tree.insert(&mut store, 5, a).unwrap();
        let b = store.push(5);
        assert_eq!(tree.insert(&mut store, 5, b), Err(Error::Duplicate));

        let mut store2 = VecStore(Vec::new());
        let mut tree2 = Tree::new_allow_duplicates();
        let a = store2.push(5);
        tree2.insert(&mut store2, 5, a).unwrap();
        let b = store2.push(5);
        tree2.insert(&mut store2, 5, b).unwrap();
        assert!(tree2.black_height(&store2).is_ok());
    }

    #[test]
    fn extract_node_preserves_remaining_order() {
        let mut store = VecStore(Vec::new());
        let mut tree = Tree::new();
        let mut handles = Vec::new();
        for key in [10u64, 5, 15, 3, 7, 12, 20, 1, 4, 6, 8] {
            let h = store.push(key);
            tree.insert(&mut store, key, h).unwrap();
            handles.push(h);
        }
        tree.black_height(&store).unwrap();

        // Remove the key=7 node directly, by handle.
        let victim = handles
            .iter()
            .copied()
            .find(|&h| store.key(h) == 7)
            .unwrap();
        tree.extract_node(&mut store, victim);
        tree.black_height(&store).unwrap();

        let mut out = Vec::new();
        let mut cur = tree.goto_min(&store, 0);
        while let Some(h) = cur {
            out.push(store.key(h));
            cur = tree.next(&store, h);
        }
        assert_eq!(out, vec![1, 3, 4, 5, 6, 8, 10, 12, 15, 20]);
    }

    #[test]
    fn key_must_fit_in_63_bits() {
        let mut store = VecStore(Vec::new());
        let mut tree = Tree::new();
        let h = store.push(0);
        assert_eq!(
            tree.insert(&mut store, 1u64 << 63, h),
            Err(Error::KeyTooLarge(1u64 << 63))
        );
    }
}
