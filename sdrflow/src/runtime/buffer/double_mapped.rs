use super::storage::{BufferKind, RingStorage, page_size};
use crate::runtime::error::{Error, Result};
use std::ptr::NonNull;

/// Storage whose pages are mapped twice back to back.
///
/// A memory file of one lap is mapped at `ptr` and again at `ptr + len`, so
/// the hardware keeps both laps identical and no mirroring copy is needed.
#[derive(Debug)]
pub struct DoubleMappedStorage {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the storage is a plain memory mapping; synchronization of its
// contents is done by the buffer indices
unsafe impl Send for DoubleMappedStorage {}
unsafe impl Sync for DoubleMappedStorage {}

impl DoubleMappedStorage {
    /// Maps a lap of `len` bytes. `len` must be a multiple of the page size.
    #[cfg(target_os = "linux")]
    pub fn new(len: usize) -> Result<DoubleMappedStorage> {
        if len == 0 || len % page_size() != 0 {
            return Err(Error::allocation(
                len,
                format!("size is not a multiple of the page size ({})", page_size()),
            ));
        }
        let total = len
            .checked_mul(2)
            .ok_or_else(|| Error::allocation(len, "size overflow"))?;
        let file_len =
            libc::off_t::try_from(len).map_err(|_| Error::allocation(len, "size overflow"))?;

        // SAFETY: the name is a valid NUL terminated string
        let fd = unsafe { libc::memfd_create(c"sdrflow-buffer".as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(Error::allocation(
                len,
                format!("memfd_create: {}", std::io::Error::last_os_error()),
            ));
        }
        let result = Self::map(fd, len, total, file_len);
        // The mappings keep the memory file alive.
        // SAFETY: fd is a file descriptor owned by this function
        unsafe { libc::close(fd) };
        result
    }

    #[cfg(target_os = "linux")]
    fn map(
        fd: libc::c_int,
        len: usize,
        total: usize,
        file_len: libc::off_t,
    ) -> Result<DoubleMappedStorage> {
        let os_error = |what: &str| {
            Error::allocation(len, format!("{what}: {}", std::io::Error::last_os_error()))
        };

        // SAFETY: fd is a valid memory file descriptor
        if unsafe { libc::ftruncate(fd, file_len) } != 0 {
            return Err(os_error("ftruncate"));
        }

        // Reserve an address range for both laps.
        // SAFETY: anonymous mapping with no address hint
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(os_error("mmap reservation"));
        }

        for lap in 0..2 {
            // SAFETY: the target address is inside the reservation made above,
            // which MAP_FIXED replaces
            let addr = unsafe {
                libc::mmap(
                    base.cast::<u8>().add(lap * len).cast(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_FIXED,
                    fd,
                    0,
                )
            };
            if addr == libc::MAP_FAILED {
                let err = os_error("mmap");
                // SAFETY: base is the reservation made above
                unsafe { libc::munmap(base, total) };
                return Err(err);
            }
        }

        match NonNull::new(base.cast::<u8>()) {
            Some(ptr) => Ok(DoubleMappedStorage { ptr, len }),
            None => Err(Error::allocation(len, "mmap returned a null pointer")),
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new(len: usize) -> Result<DoubleMappedStorage> {
        Err(Error::allocation(
            len,
            "double mapped buffers are only supported on Linux",
        ))
    }
}

impl Drop for DoubleMappedStorage {
    fn drop(&mut self) {
        // SAFETY: ptr is the start of a mapping of 2 * len bytes owned by self
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), 2 * self.len);
        }
    }
}

unsafe impl RingStorage for DoubleMappedStorage {
    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn sync_mirror(&self, _offset: usize, _n: usize) {}

    fn kind(&self) -> BufferKind {
        BufferKind::DoubleMapped
    }
}
