use std::collections::HashMap;

use parking_lot::Mutex;

use crate::circular::CircularBuffer;
use crate::Tick;

#[derive(Debug)]
struct Ring {
    ticks: CircularBuffer<Tick>,
    evicted: u64,
}

/// Owned copy of one buffer's contents, oldest first.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    pub symbol: String,
    pub ticks: Vec<Tick>,
    /// Ticks dropped by overflow since the buffer was created.
    pub evicted: u64,
}

impl BufferSnapshot {
    /// True once the ring has overflowed, so the earliest retained interval
    /// may be missing ticks.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.evicted > 0
    }
}

/// Per-symbol, capacity-bounded tick ring guarded by its own lock.
#[derive(Debug)]
pub struct TickBuffer {
    symbol: String,
    ring: Mutex<Ring>,
}

impl TickBuffer {
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            ring: Mutex::new(Ring {
                ticks: CircularBuffer::new(capacity),
                evicted: 0,
            }),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().ticks.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a tick, returning the evicted oldest tick on overflow.
    pub fn push(&self, tick: Tick) -> Option<Tick> {
        let mut ring = self.ring.lock();
        let evicted = ring.ticks.push(tick);
        if evicted.is_some() {
            ring.evicted += 1;
        }
        evicted
    }

    /// Copies the current contents; the lock is held only for the copy.
    pub fn snapshot(&self) -> BufferSnapshot {
        let (ticks, evicted) = {
            let ring = self.ring.lock();
            (ring.ticks.to_vec_ordered(), ring.evicted)
        };
        BufferSnapshot {
            symbol: self.symbol.clone(),
            ticks,
            evicted,
        }
    }
}

/// The fixed set of tracked-symbol buffers.
///
/// The symbol map itself is immutable after construction; each buffer carries
/// its own lock so different symbols never contend.
#[derive(Debug)]
pub struct TickBuffers {
    by_symbol: HashMap<String, TickBuffer>,
    order: Vec<String>,
}

impl TickBuffers {
    pub fn new<I, S>(symbols: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut by_symbol = HashMap::new();
        let mut order = Vec::new();
        for s in symbols {
            let s: String = s.into();
            if by_symbol.contains_key(&s) {
                continue;
            }
            by_symbol.insert(s.clone(), TickBuffer::new(s.clone(), capacity));
            order.push(s);
        }
        Self { by_symbol, order }
    }

    pub fn get(&self, symbol: &str) -> Option<&TickBuffer> {
        self.by_symbol.get(symbol)
    }

    pub fn symbols(&self) -> &[String] {
        &self.order
    }

    /// Buffers the tick if its symbol is tracked. Returns `false` otherwise.
    pub fn push(&self, tick: Tick) -> bool {
        match self.by_symbol.get(tick.symbol.as_str()) {
            Some(buf) => {
                buf.push(tick);
                true
            }
            None => false,
        }
    }

    /// Snapshots every buffer in configuration order, one lock at a time.
    pub fn snapshot_all(&self) -> Vec<BufferSnapshot> {
        self.order
            .iter()
            .filter_map(|s| self.by_symbol.get(s))
            .map(TickBuffer::snapshot)
            .collect()
    }
}
