//! LRU (Least Recently Used) cache implementation
//!
//! Uses intrusive linked list for O(1) eviction.

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

use crate::error::{CacheError, Result};
use crate::eviction::{EvictionCache, RemovalCause, RemovalListener};

/// Node in the LRU doubly-linked list
struct Node<K, V> {
    key: K,
    value: V,
    weight: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

type Weigher<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

/// LRU cache with fixed capacity
///
/// Capacity counts entries unless a weigher is installed, in which case it
/// bounds the summed weight and an entry heavier than the whole capacity is
/// rejected.
pub struct LruCache<K, V> {
    map: HashMap<K, usize, RandomState>,
    nodes: Vec<Option<Node<K, V>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    capacity: usize,
    weight: usize,
    weigher: Option<Weigher<V>>,
    listener: Option<RemovalListener<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a new LRU cache with the given capacity
    ///
    /// With a capacity of 0 every insert is rejected.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity.min(1024), RandomState::new()),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
            capacity,
            weight: 0,
            weigher: None,
            listener: None,
        }
    }

    /// Create a new LRU cache that reports removals to `listener`
    pub fn with_listener(capacity: usize, listener: Option<RemovalListener<K, V>>) -> Self {
        let mut cache = Self::new(capacity);
        cache.listener = listener;
        cache
    }

    /// Bound the cache by summed `weigher(value)` instead of entry count
    pub fn weighted_by<W>(mut self, weigher: W) -> Self
    where
        W: Fn(&V) -> usize + Send + Sync + 'static,
    {
        self.weigher = Some(Box::new(weigher));
        self
    }

    /// Current summed weight (equals `len()` without a weigher)
    pub fn weight(&self) -> usize {
        self.weight
    }

    fn weigh(&self, value: &V) -> usize {
        self.weigher.as_ref().map_or(1, |weigher| weigher(value))
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return; // Already at front
        }

        self.unlink(idx);

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }
    }

    /// Unlink and free `idx`, returning its node
    fn detach(&mut self, idx: usize) -> Option<Node<K, V>> {
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.map.remove(&node.key);
        self.free_node(idx);
        self.weight -= node.weight;
        Some(node)
    }

    fn evict(&mut self) {
        if let Some(tail_idx) = self.tail {
            if let Some(node) = self.detach(tail_idx) {
                if let Some(listener) = &self.listener {
                    listener(&node.key, &node.value, RemovalCause::Evicted);
                }
            }
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.free_list.push(idx);
    }
}

impl<K, V> EvictionCache<K, V> for LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(&idx) = self.map.get(key) {
            self.move_to_front(idx);
            self.nodes[idx].as_ref().map(|node| &node.value)
        } else {
            None
        }
    }

    fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    fn insert(&mut self, key: K, value: V) -> Result<()> {
        let weight = self.weigh(&value);
        if weight > self.capacity {
            return Err(CacheError::ValueRejected(format!(
                "weight {} exceeds capacity {}",
                weight, self.capacity
            )));
        }

        if let Some(&idx) = self.map.get(&key) {
            // Update existing
            if let Some(node) = &mut self.nodes[idx] {
                self.weight = self.weight - node.weight + weight;
                node.value = value;
                node.weight = weight;
            }
            self.move_to_front(idx);
            while self.weight > self.capacity && self.tail != Some(idx) {
                self.evict();
            }
            return Ok(());
        }

        // Insert new
        while !self.map.is_empty() && self.weight + weight > self.capacity {
            self.evict();
        }

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            weight,
            prev: None,
            next: self.head,
        });

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }

        self.map.insert(key, idx);
        self.weight += weight;
        Ok(())
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let idx = *self.map.get(key)?;
        let node = self.detach(idx)?;
        if let Some(listener) = &self.listener {
            listener(&node.key, &node.value, RemovalCause::Explicit);
        }
        Some(node.value)
    }

    fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
        self.weight = 0;
    }

    fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            match &self.nodes[idx] {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.prev;
                }
                None => break,
            }
        }
        keys
    }
}
