//! The module of heaps.
//!
//! See [`Heap`] for more information.

mod block;
mod check;
mod list;

use core::{fmt, num::NonZeroU32};

pub use self::{
    block::{BlockInfo, Walk},
    check::{Violation, ViolationKind},
    list::MAX_BUCKETS,
};
use self::{
    block::{Blocks, DSIZE, FIRST, MIN_SIZE, PROLOGUE, Tag, WSIZE},
    list::{FreeLists, SizeClasses},
};
use crate::{base::BaseAlloc, config, stat::Stat, track};

/// A handle to an allocated payload: its byte offset inside the arena.
///
/// Offsets are always multiples of 8, and `0` is never a payload offset.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(NonZeroU32);

impl BlockPtr {
    /// The byte offset of the payload inside the arena.
    pub const fn offset(self) -> usize {
        self.0.get() as usize
    }
}

impl fmt::Debug for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockPtr({:#x})", self.0)
    }
}

/// The tunables of a [`Heap`].
///
/// The defaults come from the build-time constants in [`config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config {
    /// The minimal amount of bytes the heap grows by when no free block fits.
    pub chunk_size: usize,
    /// Block sizes up to this bound get one bucket per double word.
    pub linear_limit: usize,
    /// The number of free-list buckets; the last one is a catch-all.
    pub bucket_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Config {
    /// The configuration built from [`config::CHUNK_SIZE`],
    /// [`config::LINEAR_LIMIT`] and [`config::BUCKET_COUNT`].
    pub const DEFAULT: Config = Config {
        chunk_size: config::CHUNK_SIZE,
        linear_limit: config::LINEAR_LIMIT,
        bucket_count: config::BUCKET_COUNT,
    };

    /// Checks the configuration for values the heap cannot work with.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.chunk_size < MIN_SIZE as usize || !self.chunk_size.is_multiple_of(DSIZE as usize) {
            return Err("`chunk_size` must be a multiple of 8 no less than 16");
        }
        if u32::try_from(self.chunk_size).is_err() {
            return Err("`chunk_size` must fit in a block tag");
        }
        if !self.linear_limit.is_power_of_two()
            || self.linear_limit < MIN_SIZE as usize
            || u32::try_from(self.linear_limit).is_err()
        {
            return Err("`linear_limit` must be a power of two no less than 16");
        }
        if !(1..=MAX_BUCKETS).contains(&self.bucket_count) {
            return Err("`bucket_count` must be within 1..=32");
        }
        Ok(())
    }

    fn classes(&self) -> SizeClasses {
        SizeClasses::new(self.linear_limit as u32, self.bucket_count)
    }
}

/// The errors of heap initialization and growth.
pub enum Error<B: BaseAlloc> {
    /// The arena provider refused to grow.
    Grow(B::Error),
    /// The request does not fit in a block tag, or would grow the arena past
    /// 4 GiB.
    TooLarge,
    /// The heap configuration is invalid.
    Config(&'static str),
}

impl<B: BaseAlloc> fmt::Debug for Error<B>
where
    B::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Grow(err) => f.debug_tuple("Grow").field(err).finish(),
            Error::TooLarge => f.write_str("TooLarge"),
            Error::Config(msg) => f.debug_tuple("Config").field(msg).finish(),
        }
    }
}

impl<B: BaseAlloc> fmt::Display for Error<B>
where
    B::Error: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Grow(err) => write!(f, "heap growth failed: {err}"),
            Error::TooLarge => write!(f, "the request exceeds the maximal block size"),
            Error::Config(msg) => write!(f, "invalid heap configuration: {msg}"),
        }
    }
}

impl<B: BaseAlloc> core::error::Error for Error<B> where B::Error: fmt::Debug + fmt::Display {}

/// A segregated-fit heap with boundary-tag coalescing, carving blocks out of
/// the region of a single arena provider.
///
/// The heap is single-threaded: every operation takes `&mut self` and runs to
/// completion. Wrap it in a lock to share it.
///
/// # Examples
///
/// ```rust
/// use segfit::{base::Mmap, heap::Heap};
///
/// let mut heap = Heap::new(Mmap::new().unwrap()).unwrap();
/// let a = heap.allocate(100).unwrap();
/// let b = heap.allocate(200).unwrap();
/// assert_eq!(a.offset() % 8, 0);
/// assert!(heap.payload(a).len() >= 100);
///
/// heap.free(Some(a));
/// heap.free(Some(b));
/// assert!(heap.check(false).is_empty());
/// ```
pub struct Heap<B: BaseAlloc> {
    base: B,
    config: Config,
    lists: FreeLists,
}

impl<B: BaseAlloc> Heap<B> {
    /// Creates a heap with the default [`Config`] and initializes it.
    ///
    /// # Errors
    ///
    /// See [`init`](Heap::init).
    pub fn new(base: B) -> Result<Self, Error<B>> {
        Self::with_config(base, Config::DEFAULT)
    }

    /// Creates a heap with `config` and initializes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid, or see
    /// [`init`](Heap::init).
    pub fn with_config(base: B, config: Config) -> Result<Self, Error<B>> {
        config.validate().map_err(Error::Config)?;
        let mut heap = Heap {
            base,
            config,
            lists: FreeLists::new(config.classes()),
        };
        heap.init()?;
        Ok(heap)
    }

    /// Resets the arena and lays out a fresh heap: the prologue and epilogue
    /// sentinels, empty buckets, and a first free block of
    /// [`chunk_size`](Config::chunk_size) bytes.
    ///
    /// Every previously returned [`BlockPtr`] is invalidated.
    ///
    /// # Errors
    ///
    /// Returns an error if the arena provider cannot supply the initial
    /// memory.
    pub fn init(&mut self) -> Result<(), Error<B>> {
        self.base.reset();
        self.lists.clear();

        let start = self.base.grow(4 * WSIZE as usize).map_err(Error::Grow)?;
        debug_assert_eq!(start, 0);

        let mut blocks = Blocks(self.base.memory_mut());
        blocks.set_word(0, 0);
        blocks.set_tags(PROLOGUE, Tag::new(DSIZE, true));
        blocks.set_header(FIRST, Tag::EPILOGUE);

        self.extend(self.config.chunk_size / WSIZE as usize)?;
        log::debug!("heap initialized with {:#x} bytes", self.base.size());
        Ok(())
    }

    /// Retrieves the arena provider of this heap.
    pub fn base(&self) -> &B {
        &self.base
    }

    /// Retrieves the configuration of this heap.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consumes the heap, returning its arena provider.
    pub fn into_base(self) -> B {
        self.base
    }

    /// The block size serving a request of `size` bytes: the payload rounded
    /// up to a double word plus the two tags, no less than [`MIN_SIZE`].
    fn adjust(size: usize) -> Option<u32> {
        const D: usize = DSIZE as usize;
        let asize = match size {
            ..=D => MIN_SIZE as usize,
            _ => size.checked_add(D + D - 1)? / D * D,
        };
        u32::try_from(asize).ok()
    }

    /// Allocates a block with at least `size` bytes of payload.
    ///
    /// Returns `None` if `size` is zero, or if the arena provider is
    /// exhausted. In neither case is the heap modified.
    pub fn allocate(&mut self, size: usize) -> Option<BlockPtr> {
        if size == 0 {
            return None;
        }
        let Some(asize) = Self::adjust(size) else {
            log::warn!("rejected oversized allocation of {size:#x} bytes");
            return None;
        };

        let bp = match self.lists.search(&Blocks(self.base.memory()), asize) {
            Some(bp) => bp,
            None => {
                let extend = (asize as usize).max(self.config.chunk_size);
                match self.extend(extend / WSIZE as usize) {
                    Ok(bp) => bp,
                    Err(Error::TooLarge) => {
                        log::warn!("rejected oversized allocation of {size:#x} bytes");
                        return None;
                    }
                    Err(_) => {
                        log::warn!("heap exhausted: cannot allocate {size:#x} bytes");
                        return None;
                    }
                }
            }
        };

        let mut blocks = Blocks(self.base.memory_mut());
        self.lists.remove(&mut blocks, bp);
        Self::place(&mut self.lists, &mut blocks, bp, asize);

        let ptr = BlockPtr(NonZeroU32::new(bp)?);
        track::allocate(self.payload(ptr));
        log::trace!("allocated {size:#x} bytes at {ptr:?}");
        Some(ptr)
    }

    /// Frees a block previously returned by [`allocate`](Heap::allocate),
    /// merging it with its free neighbors. Freeing `None` does nothing.
    ///
    /// Double frees and foreign pointers corrupt the heap; they are only
    /// caught by debug assertions and by [`check`](Heap::check).
    pub fn free(&mut self, ptr: Option<BlockPtr>) {
        let Some(ptr) = ptr else { return };
        let bp = ptr.0.get();
        debug_assert!(
            bp > PROLOGUE && (bp as usize) < self.base.size(),
            "freeing a pointer out of the heap: {ptr:?}"
        );
        track::deallocate(self.payload(ptr));

        let mut blocks = Blocks(self.base.memory_mut());
        let header = blocks.header(bp);
        debug_assert!(header.is_allocated(), "freeing a free block: {ptr:?}");
        debug_assert_eq!(blocks.footer(bp), header, "freeing a corrupted block: {ptr:?}");
        blocks.set_tags(bp, Tag::new(header.size(), false));
        Self::coalesce(&mut self.lists, &mut blocks, bp);
        log::trace!("freed {ptr:?}");
    }

    /// The usable payload of an allocated block, at least as long as the size
    /// it was requested with.
    pub fn payload(&self, ptr: BlockPtr) -> &[u8] {
        let bp = ptr.0.get();
        let size = Blocks(self.base.memory()).header(bp).size();
        &self.base.memory()[bp as usize..(bp + size - DSIZE) as usize]
    }

    /// The usable payload of an allocated block, mutably.
    pub fn payload_mut(&mut self, ptr: BlockPtr) -> &mut [u8] {
        let bp = ptr.0.get();
        let size = Blocks(self.base.memory()).header(bp).size();
        &mut self.base.memory_mut()[bp as usize..(bp + size - DSIZE) as usize]
    }

    /// The address of the payload of `ptr`.
    pub fn as_ptr(&self, ptr: BlockPtr) -> *const u8 {
        self.base.low().wrapping_add(ptr.offset())
    }

    /// Iterates over the blocks between the prologue and the epilogue, in
    /// address order.
    pub fn blocks(&self) -> Walk<'_> {
        Walk::new(self.base.memory())
    }

    /// Gathers statistics of the heap by walking all of its blocks and free
    /// lists.
    pub fn stat(&self) -> Stat {
        let mut stat = self.blocks().fold(
            Stat { heap_size: self.base.size(), ..Stat::INIT },
            |mut stat, block| {
                if block.allocated {
                    stat.allocated_count += 1;
                    stat.allocated_size += block.size;
                } else {
                    stat.free_count += 1;
                    stat.free_size += block.size;
                    stat.largest_free = stat.largest_free.max(block.size);
                }
                stat
            },
        );
        let blocks = Blocks(self.base.memory());
        for (index, count) in stat.free_per_bucket.iter_mut().enumerate() {
            *count = self.lists.iter(&blocks, index).count();
        }
        stat
    }

    /// Extends the arena by `words` words (rounded up to an even count), lays
    /// out a free block over the new memory, and moves the epilogue after it.
    ///
    /// Returns the new block after merging it with a free block that preceded
    /// the old epilogue. The block is listed in its bucket.
    fn extend(&mut self, words: usize) -> Result<u32, Error<B>> {
        let words = words.checked_next_multiple_of(2).ok_or(Error::TooLarge)?;
        let size = words.checked_mul(WSIZE as usize).ok_or(Error::TooLarge)?;
        let end = self.base.size().checked_add(size);
        if end.is_none_or(|end| u32::try_from(end).is_err()) {
            return Err(Error::TooLarge);
        }

        let start = self.base.grow(size).map_err(Error::Grow)?;
        log::debug!("heap grown by {size:#x} bytes at {start:#x}");
        // Both fit since `end` does.
        let (bp, size) = (start as u32, size as u32);

        let mut blocks = Blocks(self.base.memory_mut());
        blocks.set_tags(bp, Tag::new(size, false));
        blocks.set_header(bp + size, Tag::EPILOGUE);
        Ok(Self::coalesce(&mut self.lists, &mut blocks, bp))
    }

    /// Commits `asize` bytes of the unlisted free block `bp` as allocated,
    /// splitting off and listing the remainder if it can hold a block.
    fn place<M>(lists: &mut FreeLists, blocks: &mut Blocks<M>, bp: u32, asize: u32)
    where
        M: AsRef<[u8]> + AsMut<[u8]>,
    {
        let csize = blocks.header(bp).size();
        debug_assert!(csize >= asize);

        if csize - asize >= MIN_SIZE {
            blocks.set_tags(bp, Tag::new(asize, true));
            let rest = bp + asize;
            blocks.set_tags(rest, Tag::new(csize - asize, false));
            lists.insert(blocks, rest);
        } else {
            blocks.set_tags(bp, Tag::new(csize, true));
        }
    }

    /// Merges the unlisted free block `bp` with its free neighbors, then lists
    /// the result in the bucket of its final size.
    ///
    /// Returns the payload offset of the merged block.
    fn coalesce<M>(lists: &mut FreeLists, blocks: &mut Blocks<M>, bp: u32) -> u32
    where
        M: AsRef<[u8]> + AsMut<[u8]>,
    {
        let prev_alloc = blocks.prev_footer(bp).is_allocated();
        let next = blocks.next(bp);
        let next_alloc = blocks.header(next).is_allocated();
        let size = blocks.header(bp).size();

        let (bp, size) = match (prev_alloc, next_alloc) {
            (true, true) => (bp, size),
            (true, false) => {
                lists.remove(blocks, next);
                (bp, size + blocks.header(next).size())
            }
            (false, true) => {
                let prev = blocks.prev(bp);
                lists.remove(blocks, prev);
                (prev, size + blocks.header(prev).size())
            }
            (false, false) => {
                let prev = blocks.prev(bp);
                lists.remove(blocks, prev);
                lists.remove(blocks, next);
                let size = size + blocks.header(prev).size() + blocks.header(next).size();
                (prev, size)
            }
        };

        blocks.set_tags(bp, Tag::new(size, false));
        lists.insert(blocks, bp);
        bp
    }
}

impl<B: BaseAlloc> fmt::Debug for Heap<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("size", &self.base.size())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
