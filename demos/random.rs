use std::{
    ops::Range,
    time::{Duration, Instant},
};

use segfit::{BlockPtr, Heap, base::Mmap};

const ROUND: usize = 1000;
const SLOTS: usize = 4096;
const BLOCK_SIZES: Range<usize> = 1..4096;

fn main() {
    let mut heap = Heap::new(Mmap::with_capacity(256 << 20).unwrap()).unwrap();
    let (count, elapsed) = bench_one(&mut heap);
    println!(
        "count = {count}, elapsed = {elapsed:?}, rate = {:.0} ops/sec",
        count as f64 / elapsed.as_secs_f64()
    );

    let stat = heap.stat();
    println!(
        "heap = {:#x} bytes, {} free block(s), largest = {:#x}",
        stat.heap_size, stat.free_count, stat.largest_free
    );
    heap.assert_consistent();
}

fn bench_one(heap: &mut Heap<Mmap>) -> (usize, Duration) {
    let mut rng = fastrand::Rng::with_seed(ROUND as u64);
    let mut slots: Vec<Option<BlockPtr>> = vec![None; SLOTS];
    let mut count = 0;

    let start = Instant::now();
    for _ in 0..ROUND {
        for _ in 0..SLOTS {
            let slot = &mut slots[rng.usize(..SLOTS)];
            match slot.take() {
                Some(ptr) => heap.free(Some(ptr)),
                None => *slot = heap.allocate(rng.usize(BLOCK_SIZES)),
            }
            count += 1;
        }
    }
    slots.into_iter().for_each(|ptr| heap.free(ptr));
    (count, start.elapsed())
}
