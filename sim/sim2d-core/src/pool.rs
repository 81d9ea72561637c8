//! Slot arena with free-list reuse.
//!
//! Bodies, shapes, constraints and arbiters all live in a [`Pool`]. Released
//! slots are handed out again by the next [`Pool::acquire`], so steady-state
//! stepping does not grow or shrink the backing storage.

/// A slot arena that recycles released slots.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store a value, reusing a released slot when one is available.
    pub fn acquire(&mut self, value: T) -> usize {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(value);
            index
        } else {
            self.slots.push(Some(value));
            self.slots.len() - 1
        }
    }

    /// Take the value out of a slot and make the slot reusable.
    pub fn release(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(value)
    }

    /// Get the value in a slot.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    /// Get the value in a slot mutably.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Borrow two distinct slots mutably at once.
    ///
    /// Returns `None` if the indices are equal or either slot is empty.
    #[must_use]
    pub fn pair_mut(&mut self, first: usize, second: usize) -> Option<(&mut T, &mut T)> {
        if first == second || first.max(second) >= self.slots.len() {
            return None;
        }
        let (low, high) = (first.min(second), first.max(second));
        let (head, tail) = self.slots.split_at_mut(high);
        let low_ref = head[low].as_mut()?;
        let high_ref = tail[0].as_mut()?;
        if first < second {
            Some((low_ref, high_ref))
        } else {
            Some((high_ref, low_ref))
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total number of slots, occupied or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_released_slots() {
        let mut pool = Pool::new();
        let a = pool.acquire("a");
        let b = pool.acquire("b");
        assert_eq!(pool.len(), 2);

        assert_eq!(pool.release(a), Some("a"));
        assert_eq!(pool.release(a), None);
        assert_eq!(pool.len(), 1);

        let c = pool.acquire("c");
        assert_eq!(c, a);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.get(b), Some(&"b"));
    }

    #[test]
    fn test_pair_mut() {
        let mut pool = Pool::new();
        let a = pool.acquire(1);
        let b = pool.acquire(2);

        let (x, y) = pool.pair_mut(b, a).unwrap();
        assert_eq!((*x, *y), (2, 1));
        *x += 10;
        *y += 20;
        assert_eq!(pool.get(a), Some(&21));
        assert_eq!(pool.get(b), Some(&12));

        assert!(pool.pair_mut(a, a).is_none());
        pool.release(b);
        assert!(pool.pair_mut(a, b).is_none());
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut pool = Pool::new();
        for i in 0..4 {
            pool.acquire(i);
        }
        pool.release(1);
        let values: Vec<_> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 3]);
    }
}
