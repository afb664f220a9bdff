//! Power-of-two circular buffer for bounded per-group event history.
//!
//! Ticks and values live in two parallel ring buffers so that eviction and iteration never
//! need to touch more memory than the live window actually spans. Capacity always doubles
//! rather than growing incrementally, keeping the index-mask trick (`idx & (capacity - 1)`)
//! valid after every resize.

/// A `(tick, row)` history ring buffer over a fixed-width value row.
///
/// `T` is the tick/timestamp type; `U` is the element type of each stored row, all rows
/// sharing the same `row_len`.
#[derive(Debug, Clone)]
pub struct HistoryRingBuffer<T, U> {
    tick: Vec<T>,
    value: Vec<U>,
    row_len: usize,
    capacity: usize,
    head: usize,
    count: usize,
}

fn next_pow2(n: usize) -> usize {
    if n <= 1 {
        1
    } else {
        n.next_power_of_two()
    }
}

impl<T: Copy + Default, U: Copy + Default> HistoryRingBuffer<T, U> {
    /// Builds a buffer whose rows each hold `row_len` elements, with room for at least
    /// `initial_capacity` rows (rounded up to a power of two).
    pub fn new(row_len: usize, initial_capacity: usize) -> Self {
        let capacity = next_pow2(initial_capacity);
        Self {
            tick: vec![T::default(); capacity],
            value: vec![U::default(); capacity * row_len],
            row_len,
            capacity,
            head: 0,
            count: 0,
        }
    }

    /// Appends `(t, data)` at the back, doubling capacity first if the buffer is full.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != row_len`.
    pub fn push(&mut self, t: T, data: &[U]) {
        assert_eq!(data.len(), self.row_len, "wrong row width pushed to history");
        if self.count == self.capacity {
            self.grow(self.capacity * 2);
        }
        let tail = (self.head + self.count) & (self.capacity - 1);
        self.tick[tail] = t;
        let start = tail * self.row_len;
        self.value[start..start + self.row_len].copy_from_slice(data);
        self.count += 1;
    }

    /// Appends an empty `(t, _)` slot and returns a mutable view into its row for in-place
    /// writing, avoiding an intermediate copy.
    pub fn push_uninit(&mut self, t: T) -> (&mut [U], usize) {
        if self.count == self.capacity {
            self.grow(self.capacity * 2);
        }
        let tail = (self.head + self.count) & (self.capacity - 1);
        self.tick[tail] = t;
        self.count += 1;
        let start = tail * self.row_len;
        (&mut self.value[start..start + self.row_len], self.count - 1)
    }

    /// Removes the oldest entry, if any.
    pub fn pop_front(&mut self) {
        if self.count == 0 {
            return;
        }
        self.head = (self.head + 1) & (self.capacity - 1);
        self.count -= 1;
    }

    /// Borrows the `idx`-th entry from the front (`0` is oldest).
    pub fn get(&self, idx: usize) -> (T, &[U]) {
        assert!(idx < self.count, "history index out of bounds");
        let actual = (self.head + idx) & (self.capacity - 1);
        let start = actual * self.row_len;
        (self.tick[actual], &self.value[start..start + self.row_len])
    }

    /// Borrows the `idx`-th entry counting back from the newest (`0` is newest).
    pub fn from_back(&self, idx: usize) -> (T, &[U]) {
        assert!(idx < self.count, "history index out of bounds");
        self.get(self.count - 1 - idx)
    }

    /// The oldest live entry.
    pub fn front(&self) -> (T, &[U]) {
        self.get(0)
    }

    /// The newest live entry.
    pub fn back(&self) -> (T, &[U]) {
        self.get(self.count - 1)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drops all entries without shrinking the backing storage.
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Width of each stored row.
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    /// Iterates front-to-back over `(tick, row)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (T, &[U])> {
        (0..self.count).map(move |i| self.get(i))
    }

    fn grow(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity.is_power_of_two());
        let mut new_tick = vec![T::default(); new_capacity];
        let mut new_value = vec![U::default(); new_capacity * self.row_len];

        for i in 0..self.count {
            let (t, row) = self.get(i);
            new_tick[i] = t;
            new_value[i * self.row_len..(i + 1) * self.row_len].copy_from_slice(row);
        }

        self.tick = new_tick;
        self.value = new_value;
        self.capacity = new_capacity;
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_evict_preserve_fifo_order() {
        let mut buf = HistoryRingBuffer::<u64, f64>::new(1, 2);
        for i in 0..5u64 {
            buf.push(i, &[i as f64]);
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.front().0, 0);
        assert_eq!(buf.back().0, 4);

        buf.pop_front();
        buf.pop_front();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.front().0, 2);
        assert_eq!(buf.from_back(0).0, 4);
    }

    #[test]
    fn grows_across_wraparound_without_losing_order() {
        let mut buf = HistoryRingBuffer::<u32, u32>::new(2, 2);
        buf.push(1, &[10, 11]);
        buf.push(2, &[20, 21]);
        buf.pop_front();
        buf.push(3, &[30, 31]);
        // head has wrapped once; next push forces growth past original capacity.
        buf.push(4, &[40, 41]);
        buf.push(5, &[50, 51]);

        let ticks: Vec<u32> = buf.iter().map(|(t, _)| t).collect();
        assert_eq!(ticks, vec![2, 3, 4, 5]);
        assert_eq!(buf.get(0).1, &[20, 21]);
        assert_eq!(buf.get(3).1, &[50, 51]);
    }

    #[test]
    fn push_uninit_allows_in_place_write() {
        let mut buf = HistoryRingBuffer::<u32, f32>::new(2, 4);
        let (row, idx) = buf.push_uninit(7);
        row[0] = 1.5;
        row[1] = 2.5;
        assert_eq!(idx, 0);
        assert_eq!(buf.get(0), (7, &[1.5f32, 2.5][..]));
    }
}
