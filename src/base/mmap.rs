use std::io;

use memmap2::{MmapMut, MmapOptions};

use super::{BaseAlloc, Exhausted};

/// An arena provider backed by an anonymous memory mapping.
///
/// The whole capacity is reserved up front, so the region never moves and
/// every offset handed out stays valid for the lifetime of the provider. Pages
/// are only touched (and thus committed by the OS) once the heap writes to
/// them.
#[derive(Debug)]
pub struct Mmap {
    map: MmapMut,
    top: usize,
}

impl Mmap {
    /// The default reservation: 20 MiB.
    pub const DEFAULT_CAPACITY: usize = 20 << 20;

    /// Reserves an anonymous mapping of [`Self::DEFAULT_CAPACITY`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping could not be created.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Reserves an anonymous mapping of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero, or if the mapping could not be
    /// created.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-sized mapping"));
        }
        let map = MmapOptions::new().len(capacity).map_anon()?;
        log::debug!("reserved {capacity:#x} bytes of anonymous memory");
        Ok(Mmap { map, top: 0 })
    }

    /// The total number of bytes this provider can ever hand out.
    pub fn capacity(&self) -> usize {
        self.map.len()
    }
}

impl BaseAlloc for Mmap {
    type Error = Exhausted;

    fn memory(&self) -> &[u8] {
        &self.map[..self.top]
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.map[..self.top]
    }

    fn grow(&mut self, increment: usize) -> Result<usize, Exhausted> {
        let end = self.top.checked_add(increment);
        let end = end.filter(|&end| end <= self.map.len()).ok_or(Exhausted)?;
        Ok(core::mem::replace(&mut self.top, end))
    }

    fn reset(&mut self) {
        self.top = 0;
    }
}
