#![no_main]

use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};
use segfit::{
    Config, Heap,
    base::{Exhausted, Static},
};

#[derive(Debug, Arbitrary)]
enum Action {
    Allocate { size: u16, fill: u8 },
    Deallocate { index: u8 },
    Check,
}

#[derive(Debug, Arbitrary)]
struct Input {
    small_chunks: bool,
    actions: Vec<Action>,
}

fuzz_target!(|input: Input| {
    let config = match input.small_chunks {
        true => Config { chunk_size: 64, linear_limit: 32, bucket_count: 6 },
        false => Config::DEFAULT,
    };
    let base = Box::new(Static::<{ 1 << 20 }>::new());
    let mut heap = match Heap::with_config(base, config) {
        Ok(heap) => heap,
        Err(segfit::Error::Grow(Exhausted)) => return,
        Err(err) => panic!("{err}"),
    };

    let mut allocations = Vec::new();

    for action in input.actions {
        match action {
            Action::Allocate { size, fill } => {
                let size = size as usize;
                if let Some(ptr) = heap.allocate(size) {
                    assert_eq!(ptr.offset() % 8, 0);
                    heap.payload_mut(ptr)[..size].fill(fill);
                    allocations.push((ptr, size, fill));
                } else {
                    assert!(size == 0 || heap.stat().largest_free < size + 16);
                }
            }
            Action::Deallocate { index } => {
                if (index as usize) < allocations.len() {
                    let (ptr, size, fill) = allocations.swap_remove(index as usize);
                    assert!(heap.payload(ptr)[..size].iter().all(|&b| b == fill));
                    heap.free(Some(ptr));
                }
            }
            Action::Check => heap.assert_consistent(),
        }
    }

    heap.assert_consistent();
    for (ptr, size, fill) in allocations {
        assert!(heap.payload(ptr)[..size].iter().all(|&b| b == fill));
        heap.free(Some(ptr));
    }
    heap.stat().assert_clean();
});
