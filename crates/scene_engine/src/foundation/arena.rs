//! Frame arena allocation
//!
//! A growable pool of records that hands out stable integer indices and is
//! reset in O(1) at the start of every frame. The backing store never shrinks,
//! so after a warm-up frame the renderer performs no allocations while
//! collecting draw records.
//!
//! [`ArenaList`] threads an intrusive singly linked list through the records
//! of one arena. Nodes reference each other by [`ArenaIndex`] instead of by
//! pointer, which keeps list heads and links trivially copyable.

use std::fmt;
use std::ops::{Index, IndexMut};

/// Index of a record inside an [`ArenaAllocator`]
///
/// Only valid until the next [`ArenaAllocator::reset`] of the arena that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex(u32);

impl ArenaIndex {
    /// Raw slot number
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Growable pool of `T` with bump allocation and O(1) reset
///
/// Slots beyond the live length are kept materialized after a reset and are
/// overwritten in place by the next allocations.
pub struct ArenaAllocator<T> {
    slots: Vec<T>,
    len: usize,
}

impl<T> ArenaAllocator<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }

    /// Create an arena with room for `capacity` records before growing
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            len: 0,
        }
    }

    /// Store `value` in the next free slot and return its index
    ///
    /// Reuses a slot left over from a previous frame when one exists,
    /// otherwise grows the backing store.
    pub fn allocate(&mut self, value: T) -> ArenaIndex {
        let index = self.len;
        if index < self.slots.len() {
            self.slots[index] = value;
        } else {
            self.slots.push(value);
        }
        self.len += 1;
        ArenaIndex(index as u32)
    }

    /// Allocate a record and hand back a mutable reference for in-place setup
    pub fn allocate_with(&mut self, value: T) -> (ArenaIndex, &mut T) {
        let index = self.allocate(value);
        (index, &mut self.slots[index.get()])
    }

    /// Invalidate every index handed out so far
    ///
    /// Keeps the backing memory; stale records are dropped lazily when
    /// their slot is overwritten.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Record at `index`, if it is live
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        if index.get() < self.len {
            self.slots.get(index.get())
        } else {
            None
        }
    }

    /// Mutable record at `index`, if it is live
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        if index.get() < self.len {
            self.slots.get_mut(index.get())
        } else {
            None
        }
    }

    /// Live records, in allocation order
    pub fn active_slice(&self) -> &[T] {
        &self.slots[..self.len]
    }

    /// Live records for bulk operations such as sorting
    pub fn active_slice_mut(&mut self) -> &mut [T] {
        &mut self.slots[..self.len]
    }

    /// Iterate live records
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.active_slice().iter()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no record is live
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots that can be handed out without growing
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of slots that were ever materialized (peak live count)
    pub fn high_water_mark(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Default for ArenaAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<ArenaIndex> for ArenaAllocator<T> {
    type Output = T;

    fn index(&self, index: ArenaIndex) -> &T {
        debug_assert!(index.get() < self.len, "stale arena index {index}");
        &self.slots[index.get()]
    }
}

impl<T> IndexMut<ArenaIndex> for ArenaAllocator<T> {
    fn index_mut(&mut self, index: ArenaIndex) -> &mut T {
        debug_assert!(index.get() < self.len, "stale arena index {index}");
        &mut self.slots[index.get()]
    }
}

impl<T: fmt::Debug> fmt::Debug for ArenaAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Record that can be chained into an [`ArenaList`]
pub trait LinkedNode {
    /// Index of the following node, `None` at the end of the list
    fn next(&self) -> Option<ArenaIndex>;

    /// Relink this node
    fn set_next(&mut self, next: Option<ArenaIndex>);
}

/// Intrusive singly linked list over the records of one arena
///
/// Appending is O(1) and preserves insertion order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaList {
    head: Option<ArenaIndex>,
    tail: Option<ArenaIndex>,
    len: u32,
}

impl ArenaList {
    /// Create an empty list
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Append the record at `index` to the end of the list
    pub fn append<T: LinkedNode>(&mut self, arena: &mut ArenaAllocator<T>, index: ArenaIndex) {
        arena[index].set_next(None);
        match self.tail {
            Some(tail) => arena[tail].set_next(Some(index)),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    /// First node
    pub fn head(&self) -> Option<ArenaIndex> {
        self.head
    }

    /// Last node
    pub fn tail(&self) -> Option<ArenaIndex> {
        self.tail
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the list has no nodes
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Iterate `(index, record)` pairs in insertion order
    pub fn iter<'a, T: LinkedNode>(&self, arena: &'a ArenaAllocator<T>) -> ArenaListIter<'a, T> {
        ArenaListIter {
            arena,
            cursor: self.head,
        }
    }
}

/// Iterator over an [`ArenaList`]
pub struct ArenaListIter<'a, T> {
    arena: &'a ArenaAllocator<T>,
    cursor: Option<ArenaIndex>,
}

impl<'a, T: LinkedNode> Iterator for ArenaListIter<'a, T> {
    type Item = (ArenaIndex, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let node = &self.arena[index];
        self.cursor = node.next();
        Some((index, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Node {
        value: u32,
        next: Option<ArenaIndex>,
    }

    impl Node {
        fn new(value: u32) -> Self {
            Self { value, next: None }
        }
    }

    impl LinkedNode for Node {
        fn next(&self) -> Option<ArenaIndex> {
            self.next
        }

        fn set_next(&mut self, next: Option<ArenaIndex>) {
            self.next = next;
        }
    }

    #[test]
    fn test_allocate_returns_sequential_indices() {
        let mut arena = ArenaAllocator::new();
        let a = arena.allocate(1u32);
        let b = arena.allocate(2u32);
        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
        assert_eq!(arena[a], 1);
        assert_eq!(arena[b], 2);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_allocate_with_allows_in_place_setup() {
        let mut arena = ArenaAllocator::new();
        arena.allocate(Node::new(1));
        let (index, node) = arena.allocate_with(Node::new(2));
        node.value += 40;
        assert_eq!(index.get(), 1);
        assert_eq!(arena[index].value, 42);
    }

    #[test]
    fn test_reset_reuses_slots_without_growth() {
        let mut arena = ArenaAllocator::new();
        for frame in 0..4u32 {
            arena.reset();
            assert!(arena.is_empty());
            for i in 0..16u32 {
                arena.allocate(frame * 100 + i);
            }
            assert_eq!(arena.high_water_mark(), 16);
        }

        arena.reset();
        let first = arena.allocate(999);
        assert_eq!(first.get(), 0);
        assert_eq!(arena[first], 999);
        assert_eq!(arena.high_water_mark(), 16);
    }

    #[test]
    fn test_reset_invalidates_get() {
        let mut arena = ArenaAllocator::new();
        let index = arena.allocate(7u8);
        arena.reset();
        assert!(arena.get(index).is_none());
    }

    #[test]
    fn test_active_slice_sorting() {
        let mut arena = ArenaAllocator::new();
        for value in [5, 1, 4, 2] {
            arena.allocate(value);
        }
        arena.active_slice_mut().sort_unstable();
        assert_eq!(arena.active_slice(), &[1, 2, 4, 5]);
    }

    #[test]
    fn test_linked_list_preserves_order() {
        let mut arena = ArenaAllocator::new();
        let mut even = ArenaList::new();
        let mut odd = ArenaList::new();

        for value in 0..6 {
            let index = arena.allocate(Node::new(value));
            if value % 2 == 0 {
                even.append(&mut arena, index);
            } else {
                odd.append(&mut arena, index);
            }
        }

        let evens: Vec<u32> = even.iter(&arena).map(|(_, n)| n.value).collect();
        let odds: Vec<u32> = odd.iter(&arena).map(|(_, n)| n.value).collect();
        assert_eq!(evens, vec![0, 2, 4]);
        assert_eq!(odds, vec![1, 3, 5]);
        assert_eq!(even.len(), 3);
        assert_eq!(even.tail().map(|tail| arena[tail].value), Some(4));
        assert_eq!(odd.head().map(|head| arena[head].value), Some(1));
    }

    #[test]
    fn test_linked_list_relinks_reused_slot() {
        let mut arena = ArenaAllocator::new();
        let mut list = ArenaList::new();
        let a = arena.allocate(Node::new(1));
        let b = arena.allocate(Node::new(2));
        list.append(&mut arena, a);
        list.append(&mut arena, b);

        arena.reset();
        let mut list = ArenaList::new();
        let c = arena.allocate(Node::new(3));
        list.append(&mut arena, c);
        assert_eq!(list.iter(&arena).count(), 1);
        assert!(arena[c].next.is_none());
    }
}
