use indexmap::IndexMap;

/// Most recent result per key.
///
/// Unbounded unless built with [`ResultCache::bounded`], in which case the
/// least recently written or read key is evicted once the capacity is
/// exceeded.
#[derive(Debug, Clone)]
pub struct ResultCache<V> {
    entries: IndexMap<String, V>,
    capacity: Option<usize>,
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: None,
        }
    }
}

impl<V: Clone> ResultCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        if self.capacity.is_some() {
            let index = self.entries.get_index_of(key)?;
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
        }
        self.entries.get(key).cloned()
    }

    /// Read without touching recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Overwrites any previous value. Returns the key evicted to respect the
    /// capacity, if any.
    pub fn put(&mut self, key: &str, value: V) -> Option<String> {
        self.entries.shift_remove(key);
        self.entries.insert(key.to_string(), value);
        let capacity = self.capacity?;
        if self.entries.len() > capacity {
            return self.entries.shift_remove_index(0).map(|(evicted, _)| evicted);
        }
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
