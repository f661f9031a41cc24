use crate::heap::MAX_BUCKETS;

/// A snapshot of the block population of a heap.
///
/// Sizes are block sizes, including the boundary tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stat {
    /// The total number of bytes taken from the arena provider.
    pub heap_size: usize,

    pub allocated_count: usize,
    pub allocated_size: usize,

    pub free_count: usize,
    pub free_size: usize,
    pub largest_free: usize,

    /// The length of each free-list bucket.
    pub free_per_bucket: [usize; MAX_BUCKETS],
}

impl Default for Stat {
    fn default() -> Self {
        Self::INIT
    }
}

impl Stat {
    pub const INIT: Stat = Stat {
        heap_size: 0,
        allocated_count: 0,
        allocated_size: 0,
        free_count: 0,
        free_size: 0,
        largest_free: 0,
        free_per_bucket: [0; MAX_BUCKETS],
    };

    /// The share of the heap occupied by allocated blocks.
    pub fn utilization(&self) -> f64 {
        match self.heap_size {
            0 => 0.,
            size => self.allocated_size as f64 / size as f64,
        }
    }

    /// Asserts that every block has been freed and merged back into a single
    /// free block.
    pub fn assert_clean(&self) {
        assert_eq!(
            self.allocated_count, 0,
            "{} block(s) is(are) probably leaked",
            self.allocated_count
        );
        assert!(
            self.free_count <= 1,
            "{} free blocks are left uncoalesced",
            self.free_count
        );
        assert_eq!(
            self.free_per_bucket.iter().sum::<usize>(),
            self.free_count,
            "the free lists disagree with the heap"
        );
    }
}
