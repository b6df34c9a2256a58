use std::collections::HashMap;

use super::common::Addr;

/// A resident cache line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub tag: Addr,
    pub data: Vec<u8>,
    pub dirty: bool,
    last_used: u64,
}

impl CacheLine {
    /// copy `len` bytes starting at `offset` out of the line
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        self.data[offset..offset + len].to_vec()
    }
    /// overwrite bytes starting at `offset` and mark the line dirty
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
    }
}

/// Fully associative line table with least-recently-used replacement.
///
/// Every lookup hit and every insert stamps the line with the next value of a
/// monotonic use counter; the victim is the line with the smallest stamp.
#[derive(Debug)]
pub struct LineStore {
    lines: HashMap<Addr, CacheLine>,
    capacity: usize,
    block_size: u32,
    mru_ctr: u64,
}

impl LineStore {
    pub fn new(capacity: usize, block_size: u32) -> Self {
        assert!(capacity > 0, "line store needs room for at least one line");
        Self {
            lines: HashMap::with_capacity(capacity),
            capacity,
            block_size,
            mru_ctr: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn contains(&self, block: &Addr) -> bool {
        self.lines.contains_key(block)
    }

    /// Look a block up, marking it most recently used on a hit.
    pub fn lookup(&mut self, block: &Addr) -> Option<&mut CacheLine> {
        self.mru_ctr += 1;
        let stamp = self.mru_ctr;
        self.lines.get_mut(block).map(|line| {
            line.last_used = stamp;
            line
        })
    }

    /// Look a block up without touching the replacement state.
    pub fn peek(&self, block: &Addr) -> Option<&CacheLine> {
        self.lines.get(block)
    }

    pub fn peek_mut(&mut self, block: &Addr) -> Option<&mut CacheLine> {
        self.lines.get_mut(block)
    }

    /// Insert a freshly filled block, returning the victim if the store was full.
    pub fn insert(&mut self, block: Addr, data: Vec<u8>) -> Option<CacheLine> {
        assert_eq!(
            block,
            block.block_addr(self.block_size),
            "inserted block {} is not block aligned",
            block
        );
        assert_eq!(
            data.len(),
            self.block_size as usize,
            "fill data for {} does not cover a whole block",
            block
        );
        assert!(!self.lines.contains_key(&block), "block {} is already resident", block);

        let victim = if self.lines.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };
        self.mru_ctr += 1;
        self.lines.insert(block, CacheLine {
            tag: block,
            data,
            dirty: false,
            last_used: self.mru_ctr,
        });
        victim
    }

    fn evict_lru(&mut self) -> Option<CacheLine> {
        let lru = self.lines
            .values()
            .min_by_key(|line| line.last_used)
            .map(|line| line.tag)?;
        self.lines.remove(&lru)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u32 = 16;

    fn block(i: u64) -> Addr {
        Addr(i * BLOCK as u64)
    }

    fn zeros() -> Vec<u8> {
        vec![0; BLOCK as usize]
    }

    #[test]
    fn lookup_after_insert() {
        let mut store = LineStore::new(2, BLOCK);
        assert_eq!(store.capacity(), 2);
        assert!(store.is_empty());
        assert!(store.lookup(&block(1)).is_none());
        assert!(store.insert(block(1), zeros()).is_none());
        assert!(!store.is_empty());
        let line = store.lookup(&block(1)).unwrap();
        assert_eq!(line.tag, block(1));
        assert!(!line.dirty);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut store = LineStore::new(4, BLOCK);
        for i in 0..64 {
            store.insert(block(i), zeros());
            assert!(store.len() <= 4);
        }
        assert_eq!(store.len(), 4);
        for i in 60..64 {
            assert!(store.contains(&block(i)));
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        // A, B, C with capacity 2: C evicts A
        let mut store = LineStore::new(2, BLOCK);
        store.insert(block(0), zeros());
        store.insert(block(1), zeros());
        let victim = store.insert(block(2), zeros()).unwrap();
        assert_eq!(victim.tag, block(0));
        assert!(store.lookup(&block(0)).is_none());
    }

    #[test]
    fn lookup_refreshes_line() {
        let mut store = LineStore::new(2, BLOCK);
        store.insert(block(0), zeros());
        store.insert(block(1), zeros());
        store.lookup(&block(0));
        let victim = store.insert(block(2), zeros()).unwrap();
        assert_eq!(victim.tag, block(1));
        assert!(store.contains(&block(0)));
    }

    #[test]
    fn peek_does_not_refresh() {
        let mut store = LineStore::new(2, BLOCK);
        store.insert(block(0), zeros());
        store.insert(block(1), zeros());
        assert!(store.peek(&block(0)).is_some());
        let victim = store.insert(block(2), zeros()).unwrap();
        assert_eq!(victim.tag, block(0));
    }

    #[test]
    fn victim_carries_dirty_data() {
        let mut store = LineStore::new(1, BLOCK);
        store.insert(block(3), zeros());
        store.lookup(&block(3)).unwrap().write(4, &[1, 2, 3, 4]);
        let victim = store.insert(block(4), zeros()).unwrap();
        assert!(victim.dirty);
        assert_eq!(victim.read(4, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "already resident")]
    fn double_insert_is_fatal() {
        let mut store = LineStore::new(2, BLOCK);
        store.insert(block(0), zeros());
        store.insert(block(0), zeros());
    }
}
