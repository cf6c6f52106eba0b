/// Fixed-capacity ring of the most recent samples.
///
/// Every sample is stored twice, at `index` and `index + capacity`, so the
/// last `size()` samples are always one contiguous slice and can be read
/// without copying regardless of where the write position has wrapped to.
pub struct AudioHistory<T> {
    data: Vec<T>,
    // next write slot
    index: usize,
    length: usize,
    capacity: usize,
}

impl<T: Copy + Default> AudioHistory<T> {
    pub fn new(capacity: usize) -> AudioHistory<T> {
        let mut history = AudioHistory {
            data: Vec::new(),
            index: 0,
            length: 0,
            capacity: 0,
        };
        history.reset(capacity);
        history
    }

    /// Reallocates for `capacity` samples and forgets everything stored.
    pub fn reset(&mut self, capacity: usize) {
        debug_assert!(capacity > 0, "history needs room for at least one sample");
        self.data = vec![T::default(); 2 * capacity];
        self.index = 0;
        self.length = 0;
        self.capacity = capacity;
    }

    pub fn add(&mut self, item: T) {
        let index = self.index;
        self.data[index] = item;
        self.data[index + self.capacity] = item;
        self.index = if index + 1 != self.capacity { index + 1 } else { 0 };
        self.length = (self.length + 1).min(self.capacity);
    }

    pub fn size(&self) -> usize {
        self.length
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The last `size()` samples, oldest first.
    pub fn data(&self) -> &[T] {
        let end = self.index + self.capacity;
        &self.data[end - self.length..end]
    }
}

#[cfg(test)]
#[path = "./history_test.rs"]
mod history_test;
