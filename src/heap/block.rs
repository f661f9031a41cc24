//! Boundary-tag block layout.
//!
//! Every block in the arena is framed by a 4-byte header and a 4-byte footer,
//! each holding the block size with the allocation flag packed into its low
//! bit. Blocks are addressed by the offset of their payload, so the header
//! sits one word before and the footer one double word before the next block.
//!
//! ```text
//!    hdr        payload (or `next`, `prev` links if free)         ftr
//! | s | a | ................................................. | s | a |
//!         ^ bp                                                        ^ bp + s
//! ```

use core::fmt;

use crate::track;

/// Word and tag size in bytes.
pub(crate) const WSIZE: u32 = 4;
/// Double word size in bytes, also the alignment of every payload.
pub(crate) const DSIZE: u32 = 8;
/// Header, footer, and two free-list links.
pub(crate) const MIN_SIZE: u32 = 2 * WSIZE + 2 * WSIZE;
/// The payload offset of the prologue sentinel.
pub(crate) const PROLOGUE: u32 = 2 * WSIZE;
/// The payload offset of the first block after the prologue.
pub(crate) const FIRST: u32 = PROLOGUE + DSIZE;

/// A packed `(size, allocated)` pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Tag(u32);

impl Tag {
    pub(crate) const EPILOGUE: Tag = Tag::new(0, true);

    pub(crate) const fn new(size: u32, allocated: bool) -> Self {
        debug_assert!(size.is_multiple_of(DSIZE));
        Tag(size | allocated as u32)
    }

    pub(crate) const fn from_bits(bits: u32) -> Self {
        Tag(bits)
    }

    pub(crate) const fn size(self) -> u32 {
        self.0 & !(DSIZE - 1)
    }

    pub(crate) const fn is_allocated(self) -> bool {
        self.0 & 1 != 0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_allocated() { 'a' } else { 'f' };
        write!(f, "[{}:{state}]", self.size())
    }
}

/// The free-list links of a free block. `0` encodes "none" in the arena,
/// which is never a valid payload offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub(crate) struct Links {
    pub(crate) next: Option<u32>,
    pub(crate) prev: Option<u32>,
}

/// A decoded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Block {
    Allocated { size: u32 },
    Free { size: u32, links: Links },
}

/// Information about a single block, as reported by
/// [`Heap::blocks`](super::Heap::blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    /// The payload offset of the block inside the arena.
    pub offset: usize,
    /// The total size of the block, including its tags.
    pub size: usize,
    pub allocated: bool,
}

/// A view of arena bytes as boundary-tagged blocks.
///
/// Offsets are byte indices into the underlying slice; out-of-range accesses
/// panic like any other slice indexing.
pub(crate) struct Blocks<M>(pub(crate) M);

impl<M: AsRef<[u8]>> Blocks<M> {
    pub(crate) fn len(&self) -> usize {
        self.0.as_ref().len()
    }

    pub(crate) fn get_word(&self, at: u32) -> Option<u32> {
        let at = at as usize;
        let bytes = self.0.as_ref().get(at..at.checked_add(WSIZE as usize)?)?;
        track::defined(bytes.as_ptr(), bytes.len());
        let mut word = [0; WSIZE as usize];
        word.copy_from_slice(bytes);
        Some(u32::from_ne_bytes(word))
    }

    fn word(&self, at: u32) -> u32 {
        let at = at as usize;
        let bytes = &self.0.as_ref()[at..at + WSIZE as usize];
        track::defined(bytes.as_ptr(), bytes.len());
        let mut word = [0; WSIZE as usize];
        word.copy_from_slice(bytes);
        u32::from_ne_bytes(word)
    }

    pub(crate) fn header(&self, bp: u32) -> Tag {
        Tag(self.word(bp - WSIZE))
    }

    pub(crate) fn footer(&self, bp: u32) -> Tag {
        Tag(self.word(bp + self.header(bp).size() - DSIZE))
    }

    /// The footer of the block physically before `bp`.
    pub(crate) fn prev_footer(&self, bp: u32) -> Tag {
        Tag(self.word(bp - DSIZE))
    }

    pub(crate) fn next(&self, bp: u32) -> u32 {
        bp + self.header(bp).size()
    }

    pub(crate) fn prev(&self, bp: u32) -> u32 {
        bp - self.prev_footer(bp).size()
    }

    pub(crate) fn links(&self, bp: u32) -> Links {
        Links {
            next: Some(self.word(bp)).filter(|&next| next != 0),
            prev: Some(self.word(bp + WSIZE)).filter(|&prev| prev != 0),
        }
    }

    pub(crate) fn block(&self, bp: u32) -> Block {
        let header = self.header(bp);
        match header.is_allocated() {
            true => Block::Allocated { size: header.size() },
            false => Block::Free {
                size: header.size(),
                links: self.links(bp),
            },
        }
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> Blocks<M> {
    pub(crate) fn set_word(&mut self, at: u32, value: u32) {
        let at = at as usize;
        let bytes = &mut self.0.as_mut()[at..at + WSIZE as usize];
        track::defined(bytes.as_ptr(), bytes.len());
        bytes.copy_from_slice(&value.to_ne_bytes());
    }

    pub(crate) fn set_header(&mut self, bp: u32, tag: Tag) {
        self.set_word(bp - WSIZE, tag.0);
    }

    /// Writes `tag` to both ends of the block starting at `bp`, whose extent is
    /// taken from `tag` itself.
    pub(crate) fn set_tags(&mut self, bp: u32, tag: Tag) {
        debug_assert!(tag.size() >= DSIZE);
        self.set_word(bp - WSIZE, tag.0);
        self.set_word(bp + tag.size() - DSIZE, tag.0);
    }

    pub(crate) fn set_next(&mut self, bp: u32, next: Option<u32>) {
        self.set_word(bp, next.unwrap_or(0));
    }

    pub(crate) fn set_prev(&mut self, bp: u32, prev: Option<u32>) {
        self.set_word(bp + WSIZE, prev.unwrap_or(0));
    }

    pub(crate) fn set_links(&mut self, bp: u32, links: Links) {
        self.set_next(bp, links.next);
        self.set_prev(bp, links.prev);
    }
}

/// An iterator over the blocks between the prologue and the epilogue.
///
/// The walk stops early at the first header that cannot be read or whose
/// block would run past the end of the arena.
#[derive(Debug, Clone)]
pub struct Walk<'a> {
    memory: &'a [u8],
    bp: u32,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(memory: &'a [u8]) -> Self {
        Walk { memory, bp: FIRST }
    }
}

impl Iterator for Walk<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let blocks = Blocks(self.memory);
        let tag = Tag(blocks.get_word(self.bp.checked_sub(WSIZE)?)?);
        let next = self.bp.checked_add(tag.size())?;
        if tag.size() == 0 || next as usize > blocks.len() {
            return None;
        }
        let info = BlockInfo {
            offset: self.bp as usize,
            size: tag.size() as usize,
            allocated: tag.is_allocated(),
        };
        self.bp = next;
        Some(info)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn arena() -> [u8; 64] {
        let mut memory = [0; 64];
        let mut blocks = Blocks(&mut memory[..]);
        blocks.set_tags(PROLOGUE, Tag::new(DSIZE, true));
        blocks.set_tags(FIRST, Tag::new(16, true));
        blocks.set_tags(FIRST + 16, Tag::new(24, false));
        blocks.set_header(FIRST + 40, Tag::EPILOGUE);
        memory
    }

    #[test]
    fn tag_packing() {
        let tag = Tag::new(4096, true);
        assert_eq!(tag.size(), 4096);
        assert!(tag.is_allocated());
        assert!(!Tag::new(24, false).is_allocated());
        assert_eq!(Tag::EPILOGUE.size(), 0);
        assert!(Tag::EPILOGUE.is_allocated());
        assert_eq!(std::format!("{tag:?}"), "[4096:a]");
    }

    #[test]
    fn navigation() {
        let memory = arena();
        let blocks = Blocks(&memory[..]);
        assert_eq!(blocks.header(FIRST), Tag::new(16, true));
        assert_eq!(blocks.footer(FIRST + 16), Tag::new(24, false));
        assert_eq!(blocks.next(FIRST), FIRST + 16);
        assert_eq!(blocks.prev(FIRST + 16), FIRST);
        assert_eq!(blocks.prev(FIRST), PROLOGUE);
        assert_eq!(blocks.header(blocks.next(FIRST + 16)), Tag::EPILOGUE);
    }

    #[test]
    fn free_block_links() {
        let mut memory = arena();
        let mut blocks = Blocks(&mut memory[..]);
        let links = Links { next: Some(FIRST), prev: None };
        blocks.set_links(FIRST + 16, links);
        assert_eq!(blocks.block(FIRST + 16), Block::Free { size: 24, links });
        assert_eq!(blocks.block(FIRST), Block::Allocated { size: 16 });
    }

    #[test]
    fn walk_stops_at_epilogue() {
        let memory = arena();
        let walk: std::vec::Vec<_> = Walk::new(&memory).collect();
        assert_eq!(walk, [
            BlockInfo { offset: 16, size: 16, allocated: true },
            BlockInfo { offset: 32, size: 24, allocated: false },
        ]);
    }

    #[test]
    fn walk_stops_at_truncation() {
        let mut memory = arena();
        Blocks(&mut memory[..]).set_header(FIRST + 16, Tag::new(4096, false));
        assert_eq!(Walk::new(&memory).count(), 1);
    }
}
