//! A red-black tree that owns no node storage.
//!
//! Nodes live wherever the caller puts them -- a `Vec`, an array, bytes
//! inside someone else's buffer -- and are addressed by a `u32` index.
//! The tree only ever rewrites `left`/`right`/`parent`/`color` through
//! the [`NodeStore`] trait; it never allocates and it never fails.

/// Sentinel meaning "no node". Chosen as `u32::MAX` rather than `0`
/// because callers may legitimately use index/offset `0` for a real node.
pub const NIL: u32 = u32::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Dir {
    Left,
    Right,
}

impl Dir {
    #[inline(always)]
    fn opposite(self) -> Dir {
        match self {
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }
}

/// Backing storage for tree nodes. Implementors own the actual memory;
/// the tree itself is just `{ root }` plus algorithms.
pub trait NodeStore {
    type Key: PartialOrd + Copy;

    fn key(&self, idx: u32) -> Self::Key;
    fn left(&self, idx: u32) -> u32;
    fn right(&self, idx: u32) -> u32;
    fn parent(&self, idx: u32) -> u32;
    fn color(&self, idx: u32) -> Color;
    fn set_left(&mut self, idx: u32, v: u32);
    fn set_right(&mut self, idx: u32, v: u32);
    fn set_parent(&mut self, idx: u32, v: u32);
    fn set_color(&mut self, idx: u32, c: Color);
}

/// An ordered search structure over nodes supplied by a [`NodeStore`].
///
/// The tree itself is tiny -- just the root index -- so it is cheap to
/// keep several instances (e.g. one per size class) over the same
/// storage.
#[derive(Debug, Copy, Clone)]
pub struct RedBlackTree<K> {
    pub root: u32,
    _key: core::marker::PhantomData<fn() -> K>,
}

impl<K: PartialOrd + Copy> Default for RedBlackTree<K> {
    fn default() -> Self {
        RedBlackTree {
            root: NIL,
            _key: core::marker::PhantomData,
        }
    }
}

impl<K: PartialOrd + Copy> RedBlackTree<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    #[inline(always)]
    fn is_red<S: NodeStore<Key = K>>(&self, s: &S, node: u32) -> bool {
        node != NIL && s.color(node) == Color::Red
    }

    #[inline(always)]
    fn is_black<S: NodeStore<Key = K>>(&self, s: &S, node: u32) -> bool {
        !self.is_red(s, node)
    }

    #[inline(always)]
    fn child<S: NodeStore<Key = K>>(&self, s: &S, node: u32, dir: Dir) -> u32 {
        match dir {
            Dir::Left => s.left(node),
            Dir::Right => s.right(node),
        }
    }

    #[inline(always)]
    fn set_child<S: NodeStore<Key = K>>(&self, s: &mut S, node: u32, dir: Dir, v: u32) {
        match dir {
            Dir::Left => s.set_left(node, v),
            Dir::Right => s.set_right(node, v),
        }
    }

    /// Which side of `parent` is `child` on. Panics if they are not connected,
    /// matching the teacher's `child_dir` (a disconnected call is a bug, not
    /// a condition to recover from).
    fn child_dir<S: NodeStore<Key = K>>(&self, s: &S, parent: u32, child: u32) -> Dir {
        if s.left(parent) == child {
            Dir::Left
        } else if s.right(parent) == child {
            Dir::Right
        } else {
            panic!("nodes are not connected");
        }
    }

    /// Rotates `parent_index` in direction `dir`: `dir = Left` performs a
    /// classical left-rotation (promotes the right child), `dir = Right`
    /// performs a right-rotation.
    fn rotate_dir<S: NodeStore<Key = K>>(&mut self, s: &mut S, parent_index: u32, dir: Dir) -> u32 {
        let grandparent_index = s.parent(parent_index);
        let sibling_index = self.child(s, parent_index, dir.opposite());
        debug_assert!(sibling_index != NIL, "rotation pivot must exist");

        let child_index = self.child(s, sibling_index, dir);
        self.set_child(s, sibling_index, dir, parent_index);
        s.set_parent(parent_index, sibling_index);
        self.set_child(s, parent_index, dir.opposite(), child_index);
        if child_index != NIL {
            s.set_parent(child_index, parent_index);
        }

        if grandparent_index != NIL {
            let gp_dir = self.child_dir(s, grandparent_index, parent_index);
            self.set_child(s, grandparent_index, gp_dir, sibling_index);
            s.set_parent(sibling_index, grandparent_index);
        } else {
            s.set_parent(sibling_index, NIL);
            self.root = sibling_index;
        }
        sibling_index
    }

    fn fix_insert<S: NodeStore<Key = K>>(&mut self, s: &mut S, mut node: u32) {
        while self.is_red(s, s.parent(node)) {
            let parent = s.parent(node);
            let grandparent = s.parent(parent);
            if grandparent == NIL {
                // The root is always black, so a red parent can never be
                // the root itself -- the grandparent must exist whenever
                // this loop runs. If it doesn't, something upstream left
                // the tree in a broken state.
                debug_assert_eq!(parent, self.root);
                break;
            }
            let dir = self.child_dir(s, grandparent, parent);
            let uncle = self.child(s, grandparent, dir.opposite());
            if self.is_red(s, uncle) {
                s.set_color(parent, Color::Black);
                s.set_color(uncle, Color::Black);
                s.set_color(grandparent, Color::Red);
                node = grandparent;
            } else {
                let mut node_local = node;
                if self.child_dir(s, parent, node_local) == dir.opposite() {
                    node_local = parent;
                    self.rotate_dir(s, node_local, dir);
                }
                let parent = s.parent(node_local);
                let grandparent = s.parent(parent);
                s.set_color(parent, Color::Black);
                s.set_color(grandparent, Color::Red);
                self.rotate_dir(s, grandparent, dir.opposite());
                node = node_local;
            }
        }
        s.set_color(self.root, Color::Black);
    }

    /// Inserts an already-constructed node into the tree, keyed by
    /// `store.key(node)`. Ties descend right, so duplicate keys form an
    /// in-order run rather than being rejected or merged.
    pub fn insert<S: NodeStore<Key = K>>(&mut self, s: &mut S, node: u32) {
        s.set_left(node, NIL);
        s.set_right(node, NIL);
        s.set_color(node, Color::Red);

        let mut reference = self.root;
        if reference == NIL {
            s.set_parent(node, NIL);
            self.root = node;
            s.set_color(self.root, Color::Black);
            return;
        }

        loop {
            let (target, dir) = if key_less(s.key(node), s.key(reference)) {
                (s.left(reference), Dir::Left)
            } else {
                (s.right(reference), Dir::Right)
            };
            if target == NIL {
                s.set_parent(node, reference);
                self.set_child(s, reference, dir, node);
                break;
            }
            reference = target;
        }
        self.fix_insert(s, node);
    }

    fn transplant<S: NodeStore<Key = K>>(&mut self, s: &mut S, target: u32, source: u32) {
        let parent = s.parent(target);
        if parent == NIL {
            self.root = source;
        } else if s.left(parent) == target {
            s.set_left(parent, source);
        } else {
            s.set_right(parent, source);
        }
        if source != NIL {
            s.set_parent(source, parent);
        }
    }

    /// Deletion-fixup. Intentionally mirrors the reference implementation's
    /// behavior of skipping this entirely when the fix-up target is `NIL`
    /// (see `remove`): this function is only ever called with a non-`NIL`
    /// `node_index`, so it never has to invent a black sentinel leaf.
    fn fix_remove<S: NodeStore<Key = K>>(&mut self, s: &mut S, mut node_index: u32) {
        while node_index != self.root && self.is_black(s, node_index) {
            let parent = s.parent(node_index);
            let dir = self.child_dir(s, parent, node_index);
            let mut sibling = self.child(s, parent, dir.opposite());

            if self.is_red(s, sibling) {
                s.set_color(sibling, Color::Black);
                s.set_color(parent, Color::Red);
                self.rotate_dir(s, parent, dir);
                sibling = self.child(s, s.parent(node_index), dir.opposite());
            }

            let near = self.child(s, sibling, dir);
            let far = self.child(s, sibling, dir.opposite());
            if self.is_black(s, near) && self.is_black(s, far) {
                s.set_color(sibling, Color::Red);
                node_index = s.parent(node_index);
            } else {
                if self.is_black(s, far) {
                    s.set_color(near, Color::Black);
                    s.set_color(sibling, Color::Red);
                    self.rotate_dir(s, sibling, dir.opposite());
                    sibling = self.child(s, s.parent(node_index), dir.opposite());
                }
                let parent = s.parent(node_index);
                let parent_color = s.color(parent);
                s.set_color(sibling, parent_color);
                s.set_color(parent, Color::Black);
                let far = self.child(s, sibling, dir.opposite());
                s.set_color(far, Color::Black);
                self.rotate_dir(s, parent, dir);
                node_index = self.root;
            }
        }
        s.set_color(node_index, Color::Black);
    }

    /// Removes `node` (located by the caller, typically via [`find`](Self::find))
    /// from the tree.
    ///
    /// Known divergence from textbook red-black deletion, preserved from the
    /// reference implementation: when the spliced-in replacement is `NIL`
    /// and the removed node was black, `fix_remove` is not invoked at all.
    /// A textbook implementation would still walk the fixup treating the
    /// `NIL` child as an implicit black leaf. This can leave the tree one
    /// black-height short on that path. It is deliberately not corrected
    /// here; correcting it is a change in behavior, not a port.
    pub fn remove<S: NodeStore<Key = K>>(&mut self, s: &mut S, node: u32) {
        let mut removed_node = node;
        let mut removed_old_color = s.color(node);
        let node_to_fix;

        let left = s.left(node);
        let right = s.right(node);

        if left == NIL {
            node_to_fix = right;
            self.transplant(s, node, right);
        } else if right == NIL {
            node_to_fix = left;
            self.transplant(s, node, left);
        } else {
            removed_node = self.min(s, right);
            removed_old_color = s.color(removed_node);
            let fix_candidate = s.right(removed_node);

            if s.parent(removed_node) != node {
                self.transplant(s, removed_node, fix_candidate);
                s.set_right(removed_node, right);
                s.set_parent(right, removed_node);
            } else if fix_candidate != NIL {
                s.set_parent(fix_candidate, removed_node);
            }

            self.transplant(s, node, removed_node);
            s.set_left(removed_node, left);
            s.set_parent(left, removed_node);
            s.set_color(removed_node, s.color(node));
            node_to_fix = fix_candidate;
        }

        if removed_old_color == Color::Black && node_to_fix != NIL {
            self.fix_remove(s, node_to_fix);
        }
    }

    /// Descends the tree under a three-way predicate: `f` returns a
    /// negative number to continue into the left subtree, positive to
    /// continue right, and zero to stop at the current node.
    pub fn find<S: NodeStore<Key = K>>(
        &self,
        s: &S,
        mut f: impl FnMut(&S, u32) -> i32,
    ) -> u32 {
        let mut cur = self.root;
        while cur != NIL {
            match f(s, cur) {
                o if o < 0 => cur = s.left(cur),
                o if o > 0 => cur = s.right(cur),
                _ => return cur,
            }
        }
        NIL
    }

    pub fn min<S: NodeStore<Key = K>>(&self, s: &S, mut node: u32) -> u32 {
        while node != NIL && s.left(node) != NIL {
            node = s.left(node);
        }
        node
    }

    pub fn max<S: NodeStore<Key = K>>(&self, s: &S, mut node: u32) -> u32 {
        while node != NIL && s.right(node) != NIL {
            node = s.right(node);
        }
        node
    }

    /// In-order traversal, mostly useful for tests and diagnostics.
    pub fn inorder<S: NodeStore<Key = K>>(&self, s: &S) -> Vec<u32> {
        let mut stack = vec![];
        let mut cur = self.root;
        let mut out = vec![];
        while !stack.is_empty() || cur != NIL {
            if cur != NIL {
                stack.push(cur);
                cur = s.left(cur);
            } else {
                cur = stack.pop().unwrap();
                out.push(cur);
                cur = s.right(cur);
            }
        }
        out
    }

    /// Checks the four red-black invariants; used by tests, not by the
    /// allocator's hot path.
    pub fn is_valid<S: NodeStore<Key = K>>(&self, s: &S) -> bool {
        if self.is_red(s, self.root) {
            return false;
        }
        let mut stack = vec![(self.root, 0u32)];
        let mut black_heights = vec![];
        while let Some((node, mut count)) = stack.pop() {
            if node == NIL {
                black_heights.push(count);
                continue;
            }
            count += self.is_black(s, node) as u32;
            let left = s.left(node);
            let right = s.right(node);
            if self.is_red(s, node) && (self.is_red(s, left) || self.is_red(s, right)) {
                return false;
            }
            stack.push((left, count));
            stack.push((right, count));
        }
        black_heights.iter().all(|&h| h == black_heights[0])
    }
}

#[inline(always)]
fn key_less<K: PartialOrd>(a: K, b: K) -> bool {
    a < b
}
