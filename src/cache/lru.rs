//! Index-addressed LRU for decoded thumbnails.
//!
//! Recency is an intrusive doubly linked list stored in a node arena
//! (`Vec<Node>` addressed by handle) plus a map from grid index to handle.
//! Touch, insert and evict are O(1) and no node owns another.

use std::collections::HashMap;
use std::ops::Range;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    index: usize,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
struct Slot<T> {
    handle: usize,
    value: T,
    aspect: f32,
}

/// Bounded working set keyed by grid index
///
/// The resident map and the recency list always hold the same set of
/// indices; every method mutates both together.
#[derive(Debug)]
pub struct TextureLru<T> {
    nodes: Vec<Node>,
    free: Vec<usize>,
    /// Least recently used
    head: usize,
    /// Most recently used
    tail: usize,
    slots: HashMap<usize, Slot<T>>,
}

impl<T> Default for TextureLru<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TextureLru<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.slots.contains_key(&index)
    }

    /// Return the entry and mark it most recently used
    pub fn get(&mut self, index: usize) -> Option<&T> {
        let handle = self.slots.get(&index)?.handle;
        self.move_to_back(handle);
        self.slots.get(&index).map(|slot| &slot.value)
    }

    /// Return the entry without touching recency
    pub fn peek(&self, index: usize) -> Option<&T> {
        self.slots.get(&index).map(|slot| &slot.value)
    }

    pub fn aspect(&self, index: usize) -> Option<f32> {
        self.slots.get(&index).map(|slot| slot.aspect)
    }

    /// Insert or replace, marking the index most recently used
    pub fn insert(&mut self, index: usize, value: T, aspect: f32) {
        if let Some(slot) = self.slots.get_mut(&index) {
            slot.value = value;
            slot.aspect = aspect;
            let handle = slot.handle;
            self.move_to_back(handle);
            return;
        }

        let handle = self.alloc(index);
        self.link_back(handle);
        self.slots.insert(index, Slot { handle, value, aspect });
    }

    /// Mark most recently used. Returns false if the index is not resident.
    pub fn touch(&mut self, index: usize) -> bool {
        match self.slots.get(&index) {
            Some(slot) => {
                let handle = slot.handle;
                self.move_to_back(handle);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.remove(&index)?;
        self.unlink(slot.handle);
        self.free.push(slot.handle);
        Some(slot.value)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.slots.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Evict least recently used entries until at most `budget` remain.
    ///
    /// Entries inside `pinned` are never evicted; when one reaches the LRU
    /// end it is moved to the MRU end instead. Stops early once only pinned
    /// entries remain, even if still over budget. Returns evicted indices in
    /// eviction order.
    pub fn evict_to(&mut self, budget: usize, pinned: &Range<usize>) -> Vec<usize> {
        let mut evicted = Vec::new();
        // Pinned entries already cycled to the back
        let mut skipped = 0;

        while self.len() > budget && skipped < self.len() {
            let index = self.nodes[self.head].index;

            if pinned.contains(&index) {
                self.move_to_back(self.head);
                skipped += 1;
            } else {
                self.remove(index);
                evicted.push(index);
            }
        }

        evicted
    }

    /// Resident indices from least to most recently used
    pub fn recency_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while cursor != NIL {
            order.push(self.nodes[cursor].index);
            cursor = self.nodes[cursor].next;
        }
        order
    }

    fn alloc(&mut self, index: usize) -> usize {
        let node = Node {
            index,
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(handle) => {
                self.nodes[handle] = node;
                handle
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn link_back(&mut self, handle: usize) {
        self.nodes[handle].prev = self.tail;
        self.nodes[handle].next = NIL;
        if self.tail != NIL {
            self.nodes[self.tail].next = handle;
        } else {
            self.head = handle;
        }
        self.tail = handle;
    }

    fn unlink(&mut self, handle: usize) {
        let Node { prev, next, .. } = self.nodes[handle];
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[handle].prev = NIL;
        self.nodes[handle].next = NIL;
    }

    fn move_to_back(&mut self, handle: usize) {
        if self.tail == handle {
            return;
        }
        self.unlink(handle);
        self.link_back(handle);
    }
}
