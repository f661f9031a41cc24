//! The segregated free-list index.

use super::block::{Block, Blocks, DSIZE, Links, MIN_SIZE};

/// The maximal number of buckets a heap can be configured with.
pub const MAX_BUCKETS: usize = u32::BITS as usize;

/// Maps block sizes to bucket indices.
///
/// Sizes up to `linear_limit` get one bucket per double word; above that
/// every power of two gets its own bucket, until the last bucket which
/// collects everything larger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SizeClasses {
    linear_limit: u32,
    linear_buckets: usize,
    count: usize,
}

impl SizeClasses {
    /// `linear_limit` must be a power of two no less than [`MIN_SIZE`], and
    /// `count` must be within `1..=MAX_BUCKETS`.
    pub(crate) const fn new(linear_limit: u32, count: usize) -> Self {
        debug_assert!(linear_limit.is_power_of_two() && linear_limit >= MIN_SIZE);
        debug_assert!(count > 0 && count <= MAX_BUCKETS);
        SizeClasses {
            linear_limit,
            linear_buckets: ((linear_limit - MIN_SIZE) / DSIZE) as usize + 1,
            count,
        }
    }

    pub(crate) const fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn bucket_of(&self, size: u32) -> usize {
        let index = if size <= self.linear_limit {
            (size.saturating_sub(MIN_SIZE) / DSIZE) as usize
        } else {
            let bits = (size - 1).ilog2() - self.linear_limit.ilog2();
            self.linear_buckets + bits as usize
        };
        index.min(self.count - 1)
    }
}

/// The heads of the bucket lists, plus a bitmap of the non-empty ones.
///
/// Each bucket is a doubly linked list threaded through the payloads of its
/// free blocks. New blocks are pushed to the front.
#[derive(Debug, Clone)]
pub(crate) struct FreeLists {
    heads: [Option<u32>; MAX_BUCKETS],
    occupied: u32,
    classes: SizeClasses,
}

impl FreeLists {
    pub(crate) const fn new(classes: SizeClasses) -> Self {
        FreeLists {
            heads: [None; MAX_BUCKETS],
            occupied: 0,
            classes,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.heads = [None; MAX_BUCKETS];
        self.occupied = 0;
    }

    pub(crate) fn classes(&self) -> &SizeClasses {
        &self.classes
    }

    pub(crate) fn head(&self, index: usize) -> Option<u32> {
        self.heads[index]
    }

    pub(crate) fn is_occupied(&self, index: usize) -> bool {
        self.occupied & (1 << index) != 0
    }

    /// Pushes the free block `bp` to the front of the bucket of its current
    /// size.
    pub(crate) fn insert<M>(&mut self, blocks: &mut Blocks<M>, bp: u32)
    where
        M: AsRef<[u8]> + AsMut<[u8]>,
    {
        debug_assert!(!blocks.header(bp).is_allocated());
        let index = self.classes.bucket_of(blocks.header(bp).size());

        let next = self.heads[index].replace(bp);
        blocks.set_links(bp, Links { next, prev: None });
        if let Some(next) = next {
            blocks.set_prev(next, Some(bp));
        }
        self.occupied |= 1 << index;
    }

    /// Splices the free block `bp` out of its bucket.
    ///
    /// The header of `bp` must still carry the size the block was inserted
    /// with.
    pub(crate) fn remove<M>(&mut self, blocks: &mut Blocks<M>, bp: u32)
    where
        M: AsRef<[u8]> + AsMut<[u8]>,
    {
        debug_assert!(!blocks.header(bp).is_allocated());
        let index = self.classes.bucket_of(blocks.header(bp).size());

        let links = blocks.links(bp);
        match links.prev {
            Some(prev) => blocks.set_next(prev, links.next),
            None => {
                debug_assert_eq!(self.heads[index], Some(bp));
                self.heads[index] = links.next;
                if links.next.is_none() {
                    self.occupied &= !(1 << index);
                }
            }
        }
        if let Some(next) = links.next {
            blocks.set_prev(next, links.prev);
        }
    }

    /// Finds the first listed block of at least `asize` bytes, starting from
    /// the bucket of `asize` and moving on to larger ones.
    ///
    /// The block is left in its list.
    pub(crate) fn search<M: AsRef<[u8]>>(&self, blocks: &Blocks<M>, asize: u32) -> Option<u32> {
        let start = self.classes.bucket_of(asize);
        let mut occupied = self.occupied & (!0 << start);
        while occupied != 0 {
            let index = occupied.trailing_zeros() as usize;
            let mut cursor = self.heads[index];
            while let Some(bp) = cursor {
                match blocks.block(bp) {
                    Block::Free { size, .. } if size >= asize => return Some(bp),
                    Block::Free { links, .. } => cursor = links.next,
                    Block::Allocated { .. } => unreachable!("allocated block {bp:#x} is listed"),
                }
            }
            occupied &= occupied - 1;
        }
        None
    }

    pub(crate) fn iter<'a, M: AsRef<[u8]>>(&self, blocks: &'a Blocks<M>, index: usize) -> Iter<'a, M> {
        Iter { blocks, cursor: self.heads[index] }
    }
}

pub(crate) struct Iter<'a, M> {
    blocks: &'a Blocks<M>,
    cursor: Option<u32>,
}

impl<M: AsRef<[u8]>> Iterator for Iter<'_, M> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.cursor
            .take()
            .inspect(|&bp| self.cursor = self.blocks.links(bp).next)
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use super::{super::block::Tag, *};

    const CLASSES: SizeClasses = SizeClasses::new(128, 24);

    fn blocks(sizes: &[u32]) -> (Vec<u8>, Vec<u32>) {
        let total = sizes.iter().sum::<u32>() + 16;
        let mut memory = std::vec![0; total as usize];
        let mut blocks = Blocks(&mut memory[..]);
        let mut bp = 8;
        let offsets = sizes
            .iter()
            .map(|&size| {
                blocks.set_tags(bp, Tag::new(size, false));
                bp += size;
                bp - size
            })
            .collect();
        (memory, offsets)
    }

    #[test]
    fn buckets() {
        assert_eq!(CLASSES.bucket_of(16), 0);
        assert_eq!(CLASSES.bucket_of(24), 1);
        assert_eq!(CLASSES.bucket_of(128), 14);
        assert_eq!(CLASSES.bucket_of(136), 15);
        assert_eq!(CLASSES.bucket_of(256), 15);
        assert_eq!(CLASSES.bucket_of(264), 16);
        assert_eq!(CLASSES.bucket_of(4096), 19);
        assert_eq!(CLASSES.bucket_of(4104), 20);
        assert_eq!(CLASSES.bucket_of(1 << 20), 23);
        assert_eq!(CLASSES.bucket_of(u32::MAX & !7), 23);
    }

    #[test]
    fn buckets_are_monotonic() {
        let classes = SizeClasses::new(32, 8);
        let mut last = 0;
        for size in (16..1 << 16).step_by(8) {
            let index = classes.bucket_of(size);
            assert!(index >= last, "bucket_of({size}) = {index} < {last}");
            assert!(index < classes.count());
            last = index;
        }
        assert_eq!(last, 7);
    }

    #[test]
    fn insert_and_remove() {
        let (mut memory, bp) = blocks(&[32, 32, 32, 48]);
        let mut blocks = Blocks(&mut memory[..]);
        let mut lists = FreeLists::new(CLASSES);
        let index = CLASSES.bucket_of(32);

        lists.insert(&mut blocks, bp[0]);
        lists.insert(&mut blocks, bp[1]);
        lists.insert(&mut blocks, bp[2]);
        lists.insert(&mut blocks, bp[3]);
        assert_eq!(lists.iter(&blocks, index).collect::<Vec<_>>(), [bp[2], bp[1], bp[0]]);
        assert!(lists.is_occupied(index));

        lists.remove(&mut blocks, bp[1]);
        assert_eq!(lists.iter(&blocks, index).collect::<Vec<_>>(), [bp[2], bp[0]]);
        assert_eq!(blocks.links(bp[0]).prev, Some(bp[2]));

        lists.remove(&mut blocks, bp[2]);
        assert_eq!(lists.head(index), Some(bp[0]));
        assert_eq!(blocks.links(bp[0]).prev, None);

        lists.remove(&mut blocks, bp[0]);
        assert_eq!(lists.head(index), None);
        assert!(!lists.is_occupied(index));
        assert!(lists.is_occupied(CLASSES.bucket_of(48)));
    }

    #[test]
    fn search_first_fit_upwards() {
        let (mut memory, bp) = blocks(&[160, 200, 24, 4096]);
        let mut blocks = Blocks(&mut memory[..]);
        let mut lists = FreeLists::new(CLASSES);
        bp.iter().for_each(|&bp| lists.insert(&mut blocks, bp));

        // 160 and 200 share a bucket; 200 was pushed last and fits first.
        assert_eq!(lists.search(&blocks, 144), Some(bp[1]));
        assert_eq!(lists.search(&blocks, 168), Some(bp[1]));
        assert_eq!(lists.search(&blocks, 16), Some(bp[2]));
        assert_eq!(lists.search(&blocks, 32), Some(bp[1]));
        assert_eq!(lists.search(&blocks, 208), Some(bp[3]));
        assert_eq!(lists.search(&blocks, 4104), None);

        lists.clear();
        assert_eq!(lists.search(&blocks, 16), None);
    }
}
