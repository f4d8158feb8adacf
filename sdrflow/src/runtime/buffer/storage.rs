use std::{fmt, str::FromStr};

/// Memory backing a circular buffer.
///
/// The storage exposes one lap of `len` bytes through a pointer that is valid
/// for `2 * len` bytes, so that any span of at most `len` bytes starting inside
/// the first lap is contiguous.
///
/// # Safety
///
/// `as_mut_ptr` must return a pointer valid for reads and writes of
/// `2 * len()` bytes for as long as the storage is alive, aligned to at least
/// 64 bytes. After `sync_mirror(offset, n)` returns, byte `offset + k` and
/// byte `(offset + k + len) % (2 * len)` must hold the same value for every
/// `k < n`. Multiple calls to `as_mut_ptr` and `len` must always return the
/// same value.
#[allow(clippy::len_without_is_empty)]
pub unsafe trait RingStorage: Send + Sync {
    fn as_mut_ptr(&self) -> *mut u8;

    /// Size of one lap in bytes.
    fn len(&self) -> usize;

    /// Makes the `n` bytes written at `offset` visible through the other
    /// mapping of the same bytes.
    fn sync_mirror(&self, offset: usize, n: usize);

    fn kind(&self) -> BufferKind;
}

/// Selects how buffer storage is realized.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BufferKind {
    /// Double mapping when possible, heap otherwise.
    #[default]
    Auto,
    /// The same pages mapped twice back to back.
    DoubleMapped,
    /// Heap allocation that mirrors every write into its second half.
    Heap,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BufferKind::Auto => "auto",
            BufferKind::DoubleMapped => "double-mapped",
            BufferKind::Heap => "heap",
        })
    }
}

impl FromStr for BufferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<BufferKind, String> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BufferKind::Auto),
            "double-mapped" | "double_mapped" | "mmap" => Ok(BufferKind::DoubleMapped),
            "heap" => Ok(BufferKind::Heap),
            _ => Err(format!("unknown buffer kind '{s}'")),
        }
    }
}

/// Size of a virtual memory page.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

mod assert {
    #![allow(dead_code)]
    use super::*;

    // compile time assert for object safety of the storage trait
    fn storage_is_object_safe(_: &dyn RingStorage) {}
}
