//! The module of arena providers.
//!
//! See [`BaseAlloc`] for more information.

#[cfg(feature = "base-mmap")]
mod mmap;
#[cfg(feature = "base-static")]
mod static_;

use alloc::boxed::Box;
use core::fmt;

#[cfg(feature = "base-mmap")]
pub use self::mmap::Mmap;
#[cfg(feature = "base-static")]
pub use self::static_::Static;

/// The error returned by the providers of this crate when no more memory can
/// be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Exhausted;

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the arena provider is exhausted")
    }
}

impl core::error::Error for Exhausted {}

/// The trait of arena providers.
///
/// A provider owns a single contiguous byte region that only ever grows at its
/// high end, in the manner of `sbrk`. The [`Heap`](crate::heap::Heap) never
/// obtains memory by any other means, and addresses the region with plain
/// byte offsets from its start.
///
/// Implementations must keep the start of the region aligned to at least 8
/// bytes, and must preserve the contents of every byte previously handed out
/// across calls to [`grow`](BaseAlloc::grow).
pub trait BaseAlloc {
    /// The errors of the provider.
    type Error;

    /// The bytes handed out so far.
    fn memory(&self) -> &[u8];

    /// The bytes handed out so far, mutably.
    fn memory_mut(&mut self) -> &mut [u8];

    /// Extends the region by `increment` bytes at its high end.
    ///
    /// Returns the offset of the first new byte, which is the length of the
    /// region before the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot grow any further. The region is
    /// left untouched in that case.
    fn grow(&mut self, increment: usize) -> Result<usize, Self::Error>;

    /// Shrinks the region back to zero bytes, so that the next
    /// [`grow`](BaseAlloc::grow) starts from offset 0 again.
    fn reset(&mut self);

    /// The address of the first byte of the region.
    fn low(&self) -> *const u8 {
        self.memory().as_ptr()
    }

    /// The address of the last byte of the region, or of the byte before
    /// [`low`](BaseAlloc::low) if the region is empty.
    fn high(&self) -> *const u8 {
        self.low().wrapping_add(self.memory().len()).wrapping_sub(1)
    }

    /// The current size of the region in bytes.
    fn size(&self) -> usize {
        self.memory().len()
    }
}

impl<B: BaseAlloc + ?Sized> BaseAlloc for &mut B {
    type Error = B::Error;

    fn memory(&self) -> &[u8] {
        (**self).memory()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        (**self).memory_mut()
    }

    fn grow(&mut self, increment: usize) -> Result<usize, Self::Error> {
        (**self).grow(increment)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

impl<B: BaseAlloc + ?Sized> BaseAlloc for Box<B> {
    type Error = B::Error;

    fn memory(&self) -> &[u8] {
        (**self).memory()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        (**self).memory_mut()
    }

    fn grow(&mut self, increment: usize) -> Result<usize, Self::Error> {
        (**self).grow(increment)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
