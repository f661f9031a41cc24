use alloc::vec::Vec;
use core::fmt;

use super::{
    Heap,
    block::{Blocks, DSIZE, FIRST, MIN_SIZE, PROLOGUE, Tag, WSIZE},
    list::{FreeLists, MAX_BUCKETS},
};
use crate::base::BaseAlloc;

/// The kinds of heap inconsistencies reported by [`Heap::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViolationKind {
    /// A payload is not aligned to a double word.
    Misaligned,
    /// The header and the footer of a block disagree.
    TagMismatch,
    /// A block is smaller than the minimal block size.
    BadSize,
    /// The prologue is not an allocated double-word block.
    BadPrologue,
    /// The epilogue is not a zero-sized allocated header at the arena end.
    BadEpilogue,
    /// A block or a free-list link reaches past the arena.
    OutOfBounds,
    /// Two physically adjacent blocks are both free.
    Uncoalesced,
    /// A free block is not a member of any free list.
    Unlisted,
    /// An allocated block is a member of a free list.
    ListedAllocated,
    /// A free block is listed in a bucket not matching its size.
    WrongBucket,
    /// The links of a free list are not symmetric, point at something other
    /// than a block, or form a cycle.
    BrokenLink,
    /// The bucket bitmap disagrees with the bucket heads.
    BitmapMismatch,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationKind::Misaligned => "payload is not doubleword aligned",
            ViolationKind::TagMismatch => "header does not match footer",
            ViolationKind::BadSize => "block is smaller than the minimal size",
            ViolationKind::BadPrologue => "bad prologue header",
            ViolationKind::BadEpilogue => "bad epilogue header",
            ViolationKind::OutOfBounds => "out of the heap bounds",
            ViolationKind::Uncoalesced => "adjacent free blocks escaped coalescing",
            ViolationKind::Unlisted => "free block is not in any free list",
            ViolationKind::ListedAllocated => "allocated block is in a free list",
            ViolationKind::WrongBucket => "free block is in the wrong bucket",
            ViolationKind::BrokenLink => "broken free-list link",
            ViolationKind::BitmapMismatch => "bucket bitmap does not match its lists",
        })
    }
}

/// A heap inconsistency found at a payload offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Violation {
    pub kind: ViolationKind,
    pub offset: usize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {:#x}", self.kind, self.offset)
    }
}

struct Checker<'a> {
    blocks: Blocks<&'a [u8]>,
    low: usize,
    violations: Vec<Violation>,
}

impl Checker<'_> {
    fn report(&mut self, kind: ViolationKind, offset: u32) {
        let violation = Violation { kind, offset: offset as usize };
        log::error!("heap check: {violation}");
        self.violations.push(violation);
    }

    fn is_aligned(&self, bp: u32) -> bool {
        (self.low + bp as usize).is_multiple_of(DSIZE as usize)
    }

    fn tag(&self, at: u32) -> Option<Tag> {
        self.blocks.get_word(at).map(Tag::from_bits)
    }

    fn prologue(&mut self) -> bool {
        let (Some(header), Some(footer)) = (self.tag(PROLOGUE - WSIZE), self.tag(PROLOGUE)) else {
            self.report(ViolationKind::BadPrologue, PROLOGUE);
            return false;
        };
        if header != Tag::new(DSIZE, true) {
            self.report(ViolationKind::BadPrologue, PROLOGUE);
        }
        if header != footer {
            self.report(ViolationKind::TagMismatch, PROLOGUE);
        }
        if !self.is_aligned(PROLOGUE) {
            self.report(ViolationKind::Misaligned, PROLOGUE);
        }
        true
    }

    /// Walks the blocks in address order, returning the offsets of all block
    /// starts and whether each one is free.
    fn walk(&mut self, verbose: bool) -> Vec<(u32, bool)> {
        let mut starts = Vec::new();
        let mut prev_free = false;
        let mut bp = FIRST;
        loop {
            let Some(header) = self.tag(bp - WSIZE) else {
                self.report(ViolationKind::OutOfBounds, bp);
                break;
            };
            if header.size() == 0 {
                if verbose {
                    log::info!("{bp:#x}: EOL");
                }
                if !header.is_allocated() || bp as usize != self.blocks.len() {
                    self.report(ViolationKind::BadEpilogue, bp);
                }
                break;
            }

            if !self.is_aligned(bp) {
                self.report(ViolationKind::Misaligned, bp);
            }
            if header.size() < MIN_SIZE {
                self.report(ViolationKind::BadSize, bp);
                break;
            }
            let Some(footer) = bp.checked_add(header.size() - DSIZE).and_then(|at| self.tag(at))
            else {
                self.report(ViolationKind::OutOfBounds, bp);
                break;
            };
            if verbose {
                log::info!("{bp:#x}: header: {header:?} footer: {footer:?}");
            }
            if header != footer {
                self.report(ViolationKind::TagMismatch, bp);
            }

            let free = !header.is_allocated();
            if free && prev_free {
                self.report(ViolationKind::Uncoalesced, bp);
            }
            prev_free = free;
            starts.push((bp, free));
            bp += header.size();
        }
        starts
    }

    /// Walks every bucket, returning the offsets of all listed blocks.
    fn lists(&mut self, heap_lists: &FreeLists, starts: &[(u32, bool)]) -> Vec<u32> {
        let classes = *heap_lists.classes();
        let mut listed = Vec::new();

        for index in 0..MAX_BUCKETS {
            let head = heap_lists.head(index);
            if head.is_some() != heap_lists.is_occupied(index)
                || (index >= classes.count() && head.is_some())
            {
                self.report(ViolationKind::BitmapMismatch, head.unwrap_or(0));
            }

            let mut prev = None;
            let mut cursor = head;
            let mut budget = starts.len();
            while let Some(bp) = cursor {
                if !self.is_aligned(bp) {
                    self.report(ViolationKind::Misaligned, bp);
                    break;
                }
                let (Some(header), Some(next), Some(back)) = (
                    self.tag(bp.wrapping_sub(WSIZE)),
                    self.blocks.get_word(bp),
                    self.blocks.get_word(bp.wrapping_add(WSIZE)),
                ) else {
                    self.report(ViolationKind::OutOfBounds, bp);
                    break;
                };
                if starts.binary_search_by_key(&bp, |&(start, _)| start).is_err() {
                    self.report(ViolationKind::BrokenLink, bp);
                    break;
                }

                if header.is_allocated() {
                    self.report(ViolationKind::ListedAllocated, bp);
                } else if classes.bucket_of(header.size()) != index {
                    self.report(ViolationKind::WrongBucket, bp);
                }
                if Some(back).filter(|&back| back != 0) != prev {
                    self.report(ViolationKind::BrokenLink, bp);
                }
                listed.push(bp);

                budget = match budget.checked_sub(1) {
                    Some(budget) => budget,
                    None => {
                        self.report(ViolationKind::BrokenLink, bp);
                        break;
                    }
                };
                prev = Some(bp);
                cursor = Some(next).filter(|&next| next != 0);
            }
        }
        listed
    }
}

impl<B: BaseAlloc> Heap<B> {
    /// Walks the whole heap and its free lists, reporting every inconsistency
    /// found.
    ///
    /// The check never repairs anything. With `verbose` set, every block is
    /// logged at the `info` level as it is visited; violations are always
    /// logged at the `error` level.
    pub fn check(&self, verbose: bool) -> Vec<Violation> {
        let mut checker = Checker {
            blocks: Blocks(self.base.memory()),
            low: self.base.low().addr(),
            violations: Vec::new(),
        };
        if verbose {
            log::info!("heap ({:p}, {:#x} bytes):", self.base.low(), self.base.size());
        }
        if !checker.prologue() {
            return checker.violations;
        }

        let starts = checker.walk(verbose);
        let mut listed = checker.lists(&self.lists, &starts);
        listed.sort_unstable();
        for &(bp, free) in &starts {
            if free && listed.binary_search(&bp).is_err() {
                checker.report(ViolationKind::Unlisted, bp);
            }
        }
        checker.violations
    }

    /// Panics with the violations found by [`check`](Heap::check), if any.
    pub fn assert_consistent(&self) {
        let violations = self.check(false);
        assert!(violations.is_empty(), "the heap is inconsistent: {violations:?}");
    }
}

#[cfg(test)]
mod test {
    use std::boxed::Box;

    use super::{ViolationKind::*, *};
    use crate::base::Static;

    type TestHeap = Heap<Box<Static<{ 1 << 16 }>>>;

    /// `[a 32 @ 0x10][a 32 @ 0x30][f 4032 @ 0x50]`
    fn heap() -> TestHeap {
        let mut heap = Heap::new(Box::new(Static::new())).unwrap();
        heap.allocate(24).unwrap();
        heap.allocate(24).unwrap();
        heap
    }

    fn poke(heap: &mut TestHeap, at: u32, word: u32) {
        Blocks(heap.base.memory_mut()).set_word(at, word);
    }

    fn kinds(heap: &TestHeap) -> Vec<(ViolationKind, usize)> {
        let iter = heap.check(false).into_iter();
        iter.map(|v| (v.kind, v.offset)).collect()
    }

    #[test]
    fn healthy() {
        let mut heap = heap();
        assert!(heap.check(true).is_empty());
        let ptrs: Vec<_> = (1..50).filter_map(|n| heap.allocate(n * 7)).collect();
        heap.assert_consistent();
        ptrs.into_iter().step_by(2).for_each(|p| heap.free(Some(p)));
        heap.assert_consistent();
    }

    #[test]
    fn tag_mismatch() {
        let mut heap = heap();
        poke(&mut heap, 0x10 + 32 - 8, 40 | 1);
        assert_eq!(kinds(&heap), [(TagMismatch, 0x10)]);
    }

    #[test]
    fn escaped_free_block() {
        let mut heap = heap();
        poke(&mut heap, 0x30 - 4, 32);
        poke(&mut heap, 0x30 + 32 - 8, 32);
        assert_eq!(kinds(&heap), [(Uncoalesced, 0x50), (Unlisted, 0x30)]);
    }

    #[test]
    fn sentinels() {
        let mut heap = heap();
        let end = heap.base().size() as u32;
        poke(&mut heap, end - 4, 0);
        assert_eq!(kinds(&heap), [(BadEpilogue, end as usize)]);

        poke(&mut heap, end - 4, 1);
        poke(&mut heap, 4, 16 | 1);
        assert_eq!(kinds(&heap), [(BadPrologue, 8), (TagMismatch, 8)]);
    }

    #[test]
    fn listed_allocated() {
        let mut heap = heap();
        poke(&mut heap, 0x50 - 4, 4032 | 1);
        poke(&mut heap, 0x50 + 4032 - 8, 4032 | 1);
        assert_eq!(kinds(&heap), [(ListedAllocated, 0x50)]);
    }

    #[test]
    fn broken_links() {
        let mut heap = heap();
        poke(&mut heap, 0x50 + 4, 0x10);
        assert_eq!(kinds(&heap), [(BrokenLink, 0x50)]);

        poke(&mut heap, 0x50 + 4, 0);
        poke(&mut heap, 0x50, 0x53);
        assert_eq!(kinds(&heap), [(Misaligned, 0x53)]);

        poke(&mut heap, 0x50, 1 << 20);
        assert_eq!(kinds(&heap), [(OutOfBounds, 1 << 20)]);

        poke(&mut heap, 0x50, 0x30);
        assert_eq!(kinds(&heap), [(ListedAllocated, 0x30), (BrokenLink, 0x30)]);

        poke(&mut heap, 0x50, 0x50);
        assert!(kinds(&heap).contains(&(BrokenLink, 0x50)));
    }

    #[test]
    fn unlisted_after_clear() {
        let mut heap = heap();
        heap.lists.clear();
        assert_eq!(kinds(&heap), [(Unlisted, 0x50)]);
    }

    #[test]
    fn truncated_block() {
        let mut heap = heap();
        poke(&mut heap, 0x50 - 4, 1 << 20);
        let kinds = kinds(&heap);
        assert_eq!(kinds[0], (OutOfBounds, 0x50));
    }
}
