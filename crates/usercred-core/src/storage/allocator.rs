/// Round-robin free-slot finder for a fixed-capacity record array.
///
/// The head is only a hint for where to start looking. It is not persisted;
/// starting again from 0 after a restart is harmless.
#[derive(Debug, Clone, Copy)]
pub struct SlotAllocator {
    head: u16,
    capacity: u16,
}

impl SlotAllocator {
    pub const fn new(capacity: u16) -> Self {
        Self { head: 0, capacity }
    }

    pub const fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Returns the first slot at or after the head that `is_bound` reports
    /// free, scanning at most `capacity` candidates, and moves the head past
    /// it.
    pub fn allocate(&mut self, is_bound: impl Fn(u16) -> bool) -> Option<u16> {
        if self.capacity == 0 {
            return None;
        }

        for step in 0..self.capacity {
            let candidate = ((self.head as u32 + step as u32) % self.capacity as u32) as u16;
            if !is_bound(candidate) {
                self.head = ((candidate as u32 + 1) % self.capacity as u32) as u16;
                return Some(candidate);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_round_robin() {
        let mut allocator = SlotAllocator::new(3);
        assert_eq!(allocator.allocate(|_| false), Some(0));
        assert_eq!(allocator.allocate(|_| false), Some(1));
        assert_eq!(allocator.allocate(|_| false), Some(2));
        assert_eq!(allocator.allocate(|_| false), Some(0));
        assert_eq!(allocator.capacity(), 3);
    }

    #[test]
    fn test_skips_bound_slots_and_wraps() {
        let mut allocator = SlotAllocator::new(4);
        allocator.allocate(|_| false);
        allocator.allocate(|_| false);
        allocator.allocate(|_| false);
        // head is now 3; 3 and 0 are bound
        assert_eq!(allocator.allocate(|slot| slot == 3 || slot == 0), Some(1));
    }

    #[test]
    fn test_full_table_yields_none() {
        let mut allocator = SlotAllocator::new(2);
        assert_eq!(allocator.allocate(|_| true), None);
        assert_eq!(SlotAllocator::new(0).allocate(|_| false), None);
    }
}
