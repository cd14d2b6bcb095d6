//! extranonce1 allocation: a small counter guarded by a mutex, handing out
//! pairwise-disjoint 4-byte values to concurrently connecting sessions.

use std::sync::Mutex;

/// Hands out unique 4-byte extranonce1 values. A session's value is freed
/// back to a small reuse list on disconnect, so long-lived proxies don't
/// march the counter toward exhaustion under high connection churn.
pub struct ExtranonceAllocator {
    next: Mutex<AllocatorState>,
}

struct AllocatorState {
    counter: u32,
    freed: Vec<u32>,
}

impl ExtranonceAllocator {
    pub fn new() -> Self {
        ExtranonceAllocator {
            next: Mutex::new(AllocatorState { counter: 0, freed: Vec::new() }),
        }
    }

    /// Allocates a fresh 4-byte extranonce1, preferring a freed value over
    /// advancing the counter.
    pub fn allocate(&self) -> [u8; 4] {
        let mut state = self.next.lock().expect("extranonce allocator mutex poisoned");
        let value = state.freed.pop().unwrap_or_else(|| {
            let v = state.counter;
            state.counter = state.counter.wrapping_add(1);
            v
        });
        value.to_be_bytes()
    }

    pub fn release(&self, extranonce1: [u8; 4]) {
        let mut state = self.next.lock().expect("extranonce allocator mutex poisoned");
        state.freed.push(u32::from_be_bytes(extranonce1));
    }
}

impl Default for ExtranonceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocations_are_pairwise_disjoint() {
        let allocator = ExtranonceAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let en1 = allocator.allocate();
            assert!(seen.insert(en1), "duplicate extranonce1 {en1:?}");
        }
    }

    #[test]
    fn released_values_are_reused_before_advancing_the_counter() {
        let allocator = ExtranonceAllocator::new();
        let a = allocator.allocate();
        allocator.release(a);
        let b = allocator.allocate();
        assert_eq!(a, b);
    }
}
