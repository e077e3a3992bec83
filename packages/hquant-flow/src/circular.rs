use core::fmt;

/// Fixed-capacity ring buffer (append-only, overwrite-oldest when full).
///
/// Storage grows up to `capacity` and is then reused in place, so a full ring
/// never reallocates.
#[derive(Clone)]
pub struct CircularBuffer<T> {
    capacity: usize,
    head: usize, // next overwrite index once full
    data: Vec<T>,
}

impl<T> fmt::Debug for CircularBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircularBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.data.len())
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl<T> CircularBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            capacity,
            head: 0,
            data: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// Index (in `data`) of the oldest element.
    #[inline]
    fn start(&self) -> usize {
        if self.is_full() {
            self.head
        } else {
            0
        }
    }

    /// Pushes a new element, returning the evicted oldest one when full.
    #[inline]
    pub fn push(&mut self, v: T) -> Option<T> {
        if !self.is_full() {
            self.data.push(v);
            return None;
        }
        let old = std::mem::replace(&mut self.data[self.head], v);
        self.head = (self.head + 1) % self.capacity;
        Some(old)
    }

    /// Gets element by index from oldest (0 = oldest).
    #[inline]
    pub fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len() {
            return None;
        }
        self.data.get((self.start() + i) % self.capacity)
    }

    /// Gets element by index from newest (0 = newest).
    #[inline]
    pub fn get_from_end(&self, i: usize) -> Option<&T> {
        if i >= self.len() {
            return None;
        }
        self.get(self.len() - 1 - i)
    }

    #[inline]
    pub fn oldest(&self) -> Option<&T> {
        self.get(0)
    }

    #[inline]
    pub fn newest(&self) -> Option<&T> {
        self.get_from_end(0)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter { ring: self, i: 0 }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }
}

impl<T: Clone> CircularBuffer<T> {
    /// Copies the contents oldest-first.
    pub fn to_vec_ordered(&self) -> Vec<T> {
        let start = self.start();
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.data[start..]);
        out.extend_from_slice(&self.data[..start]);
        out
    }
}

pub struct Iter<'a, T> {
    ring: &'a CircularBuffer<T>,
    i: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;
    fn next(&mut self) -> Option<Self::Item> {
        let v = self.ring.get(self.i)?;
        self.i += 1;
        Some(v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.ring.len().saturating_sub(self.i);
        (rest, Some(rest))
    }
}
