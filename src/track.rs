#[cfg(feature = "track-valgrind")]
mod imp {
    use crabgrind::memcheck::*;

    pub fn allocate(payload: &[u8]) {
        alloc::malloc(payload.as_ptr().cast_mut().cast(), payload.len(), 0, false)
    }

    pub fn deallocate(payload: &[u8]) {
        alloc::free(payload.as_ptr().cast_mut().cast(), 0)
    }

    pub fn defined(ptr: *const u8, size: usize) {
        let _ = mark_mem(ptr.cast_mut().cast(), size, MemState::Defined);
    }
}
#[cfg(not(feature = "track-valgrind"))]
mod imp {
    pub fn allocate(payload: &[u8]) {
        let _ = payload;
    }

    pub fn deallocate(payload: &[u8]) {
        let _ = payload;
    }

    pub fn defined(ptr: *const u8, size: usize) {
        let _ = (ptr, size);
    }
}
pub use self::imp::*;
