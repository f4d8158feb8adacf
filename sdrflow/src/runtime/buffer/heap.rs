use super::storage::{BufferKind, RingStorage};
use crate::runtime::error::{Error, Result};
use std::{
    alloc::{Layout, alloc_zeroed, dealloc},
    ptr::NonNull,
};

// The data cache line size is 64 bytes in most CPUs.
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache-aligned heap storage of two laps.
///
/// Writes land in one lap and are copied to the other lap by `sync_mirror`,
/// which gives readers the same contiguous view as a double mapping at the
/// cost of one copy per committed byte.
#[derive(Debug)]
pub struct HeapStorage {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the storage is a plain byte allocation; synchronization of its
// contents is done by the buffer indices
unsafe impl Send for HeapStorage {}
unsafe impl Sync for HeapStorage {}

impl HeapStorage {
    fn layout(len: usize) -> Option<Layout> {
        let total = len.checked_mul(2)?;
        Layout::from_size_align(total, CACHE_LINE_SIZE).ok()
    }

    /// Allocates zero-initialized storage for a lap of `len` bytes.
    pub fn new(len: usize) -> Result<HeapStorage> {
        if len == 0 {
            return Err(Error::allocation(len, "zero-sized storage"));
        }
        let layout = Self::layout(len).ok_or_else(|| Error::allocation(len, "size overflow"))?;
        // SAFETY: the layout has a non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::allocation(len, "out of memory"))?;
        Ok(HeapStorage { ptr, len })
    }
}

impl Drop for HeapStorage {
    fn drop(&mut self) {
        if let Some(layout) = Self::layout(self.len) {
            // SAFETY: self.ptr was allocated with the same allocator and layout
            unsafe {
                dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

unsafe impl RingStorage for HeapStorage {
    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn sync_mirror(&self, offset: usize, n: usize) {
        let total = 2 * self.len;
        let mut done = 0;
        while done < n {
            let src = (offset + done) % total;
            let dst = (src + self.len) % total;
            // copy up to the end of whichever lap the source or the
            // destination run into first
            let chunk = (n - done)
                .min(total - src)
                .min(total - dst)
                .min(self.len - src % self.len);
            // SAFETY: src and dst are in bounds of the 2 * len allocation, the
            // chunk stays inside one lap at both ends, and both ranges belong
            // to different laps so they do not overlap
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.ptr.as_ptr().add(src).cast_const(),
                    self.ptr.as_ptr().add(dst),
                    chunk,
                );
            }
            done += chunk;
        }
    }

    fn kind(&self) -> BufferKind {
        BufferKind::Heap
    }
}
