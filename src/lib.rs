//! A segregated-fit heap allocator over a single growable arena.
//!
//! The [`Heap`] carves blocks out of the byte region of an arena provider
//! (see [`base`]), framing every block with boundary tags so that freed blocks
//! are merged with their free neighbors immediately. Free blocks are indexed
//! by size class in an array of doubly linked lists threaded through their
//! payloads, and allocation takes the first fitting block starting from the
//! bucket of the request.
//!
//! Blocks are addressed by [`BlockPtr`]s, which are plain byte offsets into
//! the arena, so the heap itself never dereferences a raw pointer.
//!
//! # Examples
//!
//! ```rust
//! use segfit::{Heap, base::Static};
//!
//! let mut heap = Heap::new(Box::new(Static::<{ 1 << 16 }>::new())).unwrap();
//! let p = heap.allocate(13).unwrap();
//! heap.payload_mut(p)[..13].copy_from_slice(b"hello, world!");
//! assert_eq!(&heap.payload(p)[..5], b"hello");
//! heap.free(Some(p));
//! heap.stat().assert_clean();
//! ```
#![no_std]

extern crate alloc;
#[cfg(any(test, feature = "base-mmap"))]
extern crate std;

pub mod base;
pub mod heap;
pub mod stat;
mod track;

/// The build-time defaults of [`Config`], overridable with the `SF_*`
/// environment variables of the same names.
pub mod config {
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

pub use self::heap::{BlockPtr, Config, Error, Heap};

#[cfg(test)]
mod test {
    use std::{boxed::Box, vec::Vec};

    use crate::{
        BlockPtr, Heap,
        base::{BaseAlloc, Static},
    };

    type TestHeap = Heap<Box<Static<{ 1 << 16 }>>>;

    fn heap() -> TestHeap {
        Heap::new(Box::new(Static::new())).unwrap()
    }

    fn range(heap: &TestHeap, p: BlockPtr) -> core::ops::Range<usize> {
        p.offset()..p.offset() + heap.payload(p).len()
    }

    #[test]
    fn disjoint() {
        let mut heap = heap();
        let p1 = heap.allocate(100).unwrap();
        let p2 = heap.allocate(200).unwrap();
        assert_ne!(p1, p2);

        let (r1, r2) = (range(&heap, p1), range(&heap, p2));
        assert!(r1.end <= r2.start || r2.end <= r1.start);
        assert!(r1.len() >= 100 && r2.len() >= 200);
        assert_eq!(heap.as_ptr(p1).addr() % 8, 0);
    }

    #[test]
    fn reuse_after_free() {
        let mut heap = heap();
        let before = heap.stat();
        let p = heap.allocate(64).unwrap();
        heap.free(Some(p));
        assert_eq!(heap.stat(), before);

        let q = heap.allocate(64).unwrap();
        assert_eq!(q, p);
        assert_eq!(heap.stat().allocated_count, 1);
    }

    #[test]
    fn adjacent_frees_merge() {
        let mut heap = heap();
        let p0 = heap.allocate(8).unwrap();
        let p1 = heap.allocate(32).unwrap();
        let p2 = heap.allocate(32).unwrap();
        let p3 = heap.allocate(8).unwrap();
        assert_eq!(range(&heap, p1).end + 8, p2.offset());

        heap.free(Some(p1));
        heap.free(Some(p2));
        let free: Vec<_> = heap.blocks().filter(|b| !b.allocated).collect();
        assert_eq!(free.len(), 2);
        assert_eq!(free[0].offset, p1.offset());
        assert_eq!(free[0].size, 2 * 40);
        assert!(heap.check(false).is_empty());

        heap.free(Some(p0));
        heap.free(Some(p3));
        heap.stat().assert_clean();
    }

    #[test]
    fn exhaustion() {
        let mut heap = heap();
        let mut live = Vec::new();
        let last = loop {
            match heap.allocate(10000) {
                Some(p) => {
                    heap.payload_mut(p).fill(live.len() as u8);
                    live.push(p);
                }
                None => break heap.stat(),
            }
        };
        assert_eq!(live.len(), 6);
        assert_eq!(last.allocated_count, live.len());
        for (index, &p) in live.iter().enumerate() {
            assert!(heap.payload(p).iter().all(|&b| b == index as u8));
        }

        // Smaller requests still succeed from what is left.
        assert!(heap.allocate(100).is_some());
        heap.assert_consistent();
    }

    #[test]
    fn no_op_requests() {
        let mut heap = heap();
        heap.allocate(10).unwrap();
        let before = heap.base().memory().to_vec();
        assert_eq!(heap.allocate(0), None);
        heap.free(None);
        heap.free(None);
        assert_eq!(heap.base().memory(), &before[..]);
    }

    #[test]
    #[cfg(feature = "base-mmap")]
    fn random_workload() {
        use crate::base::Mmap;

        let mut rng = fastrand::Rng::with_seed(0x5e6f17);
        let mut heap = Heap::new(Mmap::with_capacity(32 << 20).unwrap()).unwrap();
        let mut live: Vec<(BlockPtr, usize, u8)> = Vec::new();

        for round in 0..20000 {
            if live.is_empty() || rng.bool() {
                let size = match rng.u8(..4) {
                    0 => rng.usize(1..=16),
                    1 | 2 => rng.usize(17..=512),
                    _ => rng.usize(513..=16384),
                };
                let p = heap.allocate(size).unwrap();
                assert_eq!(p.offset() % 8, 0);
                assert!(heap.payload(p).len() >= size);

                let fill = rng.u8(..);
                heap.payload_mut(p)[..size].fill(fill);
                live.push((p, size, fill));
            } else {
                let (p, size, fill) = live.swap_remove(rng.usize(..live.len()));
                assert!(heap.payload(p)[..size].iter().all(|&b| b == fill));
                heap.free(Some(p));
            }

            if round % 500 == 0 {
                heap.assert_consistent();
                let blocks: Vec<_> = heap.blocks().collect();
                assert!(blocks.windows(2).all(|w| w[0].allocated || w[1].allocated));
                assert!(blocks.windows(2).all(|w| w[0].offset + w[0].size == w[1].offset));
            }
        }

        live.drain(..).for_each(|(p, ..)| heap.free(Some(p)));
        heap.assert_consistent();
        heap.stat().assert_clean();
    }
}
