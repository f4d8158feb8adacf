use super::{BufferShared, ReaderShared};
use crate::runtime::{
    error::{Error, Result},
    tag::Tag,
};
use std::{
    fmt,
    sync::{Arc, atomic::Ordering},
};

/// Consumer end of a [`Buffer`](super::Buffer).
///
/// Each reader has its own cursor, so several readers of the same buffer
/// consume independently. Dropping the reader detaches it from the buffer.
pub struct BufferReader {
    shared: Arc<BufferShared>,
    reader: Arc<ReaderShared>,
}

impl BufferReader {
    pub(super) fn new(shared: Arc<BufferShared>, reader: Arc<ReaderShared>) -> BufferReader {
        BufferReader { shared, reader }
    }

    /// Items committed by the writer and not consumed yet.
    pub fn available_items(&self) -> usize {
        let write = self.shared.write_index.load(Ordering::Acquire);
        let read = self.reader.read_index.load(Ordering::Relaxed);
        write.saturating_sub(read) as usize
    }

    /// Readable window: `history` items of lookback followed by every
    /// available item.
    ///
    /// Lookback positions that have never been written read as zeros.
    pub fn read_slot(&self) -> &[u8] {
        let shared = &*self.shared;
        let available = self.available_items();
        let read = self.reader.read_index.load(Ordering::Relaxed);
        let history = self.reader.history as u64;
        let start = read + shared.capacity as u64 - history;
        let offset = shared.offset_of(start);
        // SAFETY: offset is inside the first lap and available + history never
        // exceeds the capacity, so the window is inside the storage. The
        // writer does not write to this window while the reader is attached.
        unsafe {
            std::slice::from_raw_parts(
                shared.storage.as_mut_ptr().add(offset).cast_const(),
                (available + self.reader.history) * shared.item_size,
            )
        }
    }

    /// Advances the cursor by `n` items.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        let available = self.available_items();
        if n > available {
            return Err(Error::Underrun {
                requested: n,
                available,
            });
        }
        if n == 0 {
            return Ok(());
        }
        // Only this reader modifies its cursor.
        let read = self.reader.read_index.load(Ordering::Relaxed);
        // Release so that the writer only reuses the space after we are done
        // reading it.
        self.reader
            .read_index
            .store(read + n as u64, Ordering::Release);
        self.shared.prune_tags();
        self.shared.notify_writer();
        Ok(())
    }

    /// Tags with absolute offset in `[lo, hi)`.
    pub fn tags_in_range(&self, lo: u64, hi: u64) -> Vec<Tag> {
        self.shared.lock_tags().range(lo, hi)
    }

    /// Absolute index of the next item to be consumed.
    pub fn nitems_read(&self) -> u64 {
        self.reader.read_index.load(Ordering::Relaxed)
    }

    pub fn history(&self) -> usize {
        self.reader.history
    }

    pub fn item_size(&self) -> usize {
        self.shared.item_size
    }

    /// Whether the writer has finished. Items already committed can still be
    /// read.
    pub fn is_upstream_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        self.shared
            .lock_readers()
            .retain(|reader| !Arc::ptr_eq(reader, &self.reader));
        self.shared.prune_tags();
        self.shared.notify_writer();
    }
}

impl fmt::Debug for BufferReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferReader")
            .field("nitems_read", &self.nitems_read())
            .field("available", &self.available_items())
            .field("history", &self.reader.history)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::super::{Buffer, BufferKind};
    use crate::runtime::{error::Error, notify::Notifier, tag::Tag};
    use std::sync::Arc;

    #[test]
    fn underrun() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let mut reader = buffer.add_reader(0).unwrap();
        buffer.write_slot();
        buffer.commit_write(3).unwrap();
        assert!(matches!(
            reader.consume(4),
            Err(Error::Underrun {
                requested: 4,
                available: 3
            })
        ));
        reader.consume(3).unwrap();
        assert_eq!(reader.available_items(), 0);
    }

    #[test]
    fn history_preroll_is_zero() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let reader = buffer.add_reader(4).unwrap();
        let slot = buffer.write_slot();
        for (n, chunk) in slot.bytes.chunks_exact_mut(4).take(2).enumerate() {
            chunk.copy_from_slice(&(n as u32 + 1).to_ne_bytes());
        }
        buffer.commit_write(2).unwrap();
        let window = reader.read_slot();
        assert_eq!(window.len(), 6 * 4);
        assert!(window[..16].iter().all(|&b| b == 0));
        assert_eq!(&window[16..20], &1u32.to_ne_bytes());
    }

    #[test]
    fn late_reader_sees_nothing() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let _first = buffer.add_reader(0).unwrap();
        buffer.write_slot();
        buffer.commit_write(5).unwrap();
        let late = buffer.add_reader(0).unwrap();
        assert_eq!(late.available_items(), 0);
        assert_eq!(late.nitems_read(), 5);
    }

    #[test]
    fn tags_pruned_after_every_reader_passed() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let mut a = buffer.add_reader(0).unwrap();
        let mut b = buffer.add_reader(1).unwrap();
        buffer.write_slot();
        buffer.add_tag(Tag::new(2, "burst", 1u64));
        buffer.commit_write(8).unwrap();
        assert_eq!(a.tags_in_range(2, 3).len(), 1);
        assert!(a.tags_in_range(0, 2).is_empty());

        a.consume(8).unwrap();
        assert_eq!(buffer.tag_count(), 1);
        // b keeps one item of history, so it can still see index 2 at read 3
        b.consume(3).unwrap();
        assert_eq!(buffer.tag_count(), 1);
        b.consume(1).unwrap();
        assert_eq!(buffer.tag_count(), 0);
    }

    #[test]
    fn tags_kept_without_readers() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let reader = buffer.add_reader(0).unwrap();
        buffer.add_tag(Tag::new(0, "a", true));
        drop(reader);
        assert_eq!(buffer.tag_count(), 1);
    }

    #[test]
    fn consume_wakes_writer() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let notifier = Arc::new(Notifier::new());
        buffer.set_writer_notifier(Arc::clone(&notifier));
        let mut reader = buffer.add_reader(0).unwrap();
        buffer.write_slot();
        buffer.commit_write(2).unwrap();
        reader.consume(2).unwrap();
        assert!(notifier.wait_output());
    }
}
