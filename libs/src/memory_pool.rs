use zeroize::Zeroize;

/// Fixed-capacity staging buffer reused by every step of a streaming loop.
///
/// The capacity is reserved once; `refill` never grows it, so a loop over
/// millions of elements keeps the footprint of a single batch.
pub struct BatchBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    batches: usize,
}

impl<T> BatchBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: Vec::with_capacity(capacity), capacity, batches: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of batches pushed through this buffer so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Clears the buffer and fills it with at most `capacity` items pulled
    /// from `next`. Stops early when `next` yields `None`.
    pub fn refill<E>(&mut self, want: usize, mut next: impl FnMut() -> Result<T, E>) -> Result<&[T], E> {
        self.items.clear();
        let want = want.min(self.capacity);
        for _ in 0..want {
            self.items.push(next()?);
        }
        self.batches += 1;
        Ok(&self.items)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<T> {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Zeroize> BatchBuffer<T> {
    /// Overwrites the staged items before clearing them.
    pub fn wipe(&mut self) {
        self.items.zeroize();
    }
}

/// Splits `total` items into `(offset, len)` batches of at most `batch` items.
pub fn batch_ranges(total: usize, batch: usize) -> impl Iterator<Item = (usize, usize)> {
    let batch = batch.max(1);
    (0..total).step_by(batch).map(move |start| (start, batch.min(total - start)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refill_is_bounded() {
        let mut buf = BatchBuffer::<u64>::new(4);
        let mut counter = 0u64;
        let got = buf
            .refill(10, || -> Result<u64, ()> {
                counter += 1;
                Ok(counter)
            })
            .unwrap()
            .to_vec();
        assert_eq!(got, vec![1, 2, 3, 4]);
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.batches(), 1);

        let err = buf.refill(2, || -> Result<u64, &str> { Err("eof") });
        assert_eq!(err.unwrap_err(), "eof");
    }

    #[test]
    fn test_wipe_clears() {
        let mut buf = BatchBuffer::<u64>::new(3);
        buf.refill(3, || -> Result<u64, ()> { Ok(9) }).unwrap();
        buf.wipe();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_batch_ranges() {
        let r: Vec<_> = batch_ranges(10, 4).collect();
        assert_eq!(r, vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(batch_ranges(0, 4).count(), 0);
    }
}
