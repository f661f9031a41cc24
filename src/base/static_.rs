use super::{BaseAlloc, Exhausted};

#[derive(Debug, Clone, Copy)]
#[repr(C, align(8))]
struct Memory<const CAP: usize>([u8; CAP]);

/// An arena provider managing a constant sized block of inline memory.
///
/// The region starts empty and is handed out from the front, up to `CAP`
/// bytes in total. Growing past that fails with [`Exhausted`].
///
/// # Examples
///
/// ```rust
/// use segfit::{base::Static, heap::Heap};
///
/// let mut heap = Heap::new(Box::new(Static::<{ 64 * 1024 }>::new())).unwrap();
/// let ptr = heap.allocate(100).unwrap();
/// heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
/// heap.free(Some(ptr));
/// ```
#[derive(Debug, Clone)]
pub struct Static<const CAP: usize> {
    memory: Memory<CAP>,
    top: usize,
}

impl<const CAP: usize> Default for Static<CAP> {
    fn default() -> Self {
        Self::INIT
    }
}

impl<const CAP: usize> Static<CAP> {
    /// The initialization constant. Equivalent to [`Self::new`].
    pub const INIT: Self = Self::new();

    /// Creates a new provider with all of its `CAP` bytes still available.
    pub const fn new() -> Self {
        Static {
            memory: Memory([0; CAP]),
            top: 0,
        }
    }

    /// The total number of bytes this provider can ever hand out.
    pub const fn capacity(&self) -> usize {
        CAP
    }
}

impl<const CAP: usize> BaseAlloc for Static<CAP> {
    type Error = Exhausted;

    fn memory(&self) -> &[u8] {
        &self.memory.0[..self.top]
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory.0[..self.top]
    }

    fn grow(&mut self, increment: usize) -> Result<usize, Exhausted> {
        let end = self.top.checked_add(increment).filter(|&end| end <= CAP);
        let end = end.ok_or(Exhausted)?;
        Ok(core::mem::replace(&mut self.top, end))
    }

    fn reset(&mut self) {
        self.top = 0;
    }
}
