use super::{
    error::{Error, Result},
    notify::Notifier,
    tag::{Tag, TagTable},
};
use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

mod double_mapped;
mod heap;
mod reader;
mod storage;
pub use double_mapped::DoubleMappedStorage;
pub use heap::{CACHE_LINE_SIZE, HeapStorage};
pub use reader::BufferReader;
pub use storage::{BufferKind, RingStorage, page_size};

/// Circular buffer of one output port.
///
/// The `Buffer` object is the writer end and is owned by the producing block.
/// Consumers hold [`BufferReader`]s. Item indices are absolute: they count
/// every item committed since the buffer was created and never wrap.
///
/// The writer may only write into the region that no reader can still see:
/// for every reader, `write - (read - history) <= capacity`.
pub struct Buffer {
    shared: Arc<BufferShared>,
    // items reported writable by the last write_slot, minus the items
    // committed since then
    reported: usize,
    done_on_drop: bool,
}

struct BufferShared {
    storage: Box<dyn RingStorage>,
    item_size: usize,
    capacity: usize,
    write_index: AtomicU64,
    done: AtomicBool,
    readers: Mutex<Vec<Arc<ReaderShared>>>,
    tags: Mutex<TagTable>,
    writer: OnceLock<Arc<Notifier>>,
}

struct ReaderShared {
    read_index: AtomicU64,
    history: usize,
    notifier: Option<Arc<Notifier>>,
}

/// Writable region returned by [`Buffer::write_slot`].
#[derive(Debug)]
pub struct WriteSlot<'a> {
    pub bytes: &'a mut [u8],
    pub items: usize,
}

impl Buffer {
    /// Allocates a buffer of `capacity_bytes` bytes holding items of
    /// `item_size` bytes, with the default storage selection.
    pub fn allocate(capacity_bytes: usize, item_size: usize) -> Result<Buffer> {
        Buffer::allocate_with(capacity_bytes, item_size, BufferKind::Auto)
    }

    pub fn allocate_with(
        capacity_bytes: usize,
        item_size: usize,
        kind: BufferKind,
    ) -> Result<Buffer> {
        if item_size == 0 {
            return Err(Error::allocation(capacity_bytes, "item size is zero"));
        }
        if capacity_bytes == 0 {
            return Err(Error::allocation(capacity_bytes, "capacity is zero"));
        }
        if capacity_bytes % item_size != 0 {
            return Err(Error::allocation(
                capacity_bytes,
                format!("item size {item_size} does not divide the capacity"),
            ));
        }
        let storage: Box<dyn RingStorage> = match kind {
            BufferKind::Heap => Box::new(HeapStorage::new(capacity_bytes)?),
            BufferKind::DoubleMapped => Box::new(DoubleMappedStorage::new(capacity_bytes)?),
            BufferKind::Auto if capacity_bytes % page_size() == 0 => {
                match DoubleMappedStorage::new(capacity_bytes) {
                    Ok(storage) => Box::new(storage),
                    Err(err) => {
                        tracing::warn!(%err, "double mapping failed; using heap storage");
                        Box::new(HeapStorage::new(capacity_bytes)?)
                    }
                }
            }
            BufferKind::Auto => {
                tracing::debug!(capacity_bytes, "capacity not page aligned; using heap storage");
                Box::new(HeapStorage::new(capacity_bytes)?)
            }
        };
        Ok(Buffer {
            shared: Arc::new(BufferShared {
                storage,
                item_size,
                capacity: capacity_bytes / item_size,
                write_index: AtomicU64::new(0),
                done: AtomicBool::new(false),
                readers: Mutex::new(Vec::new()),
                tags: Mutex::new(TagTable::new()),
                writer: OnceLock::new(),
            }),
            reported: 0,
            done_on_drop: true,
        })
    }

    /// Capacity in items.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn capacity_bytes(&self) -> usize {
        self.shared.capacity * self.shared.item_size
    }

    pub fn item_size(&self) -> usize {
        self.shared.item_size
    }

    pub fn kind(&self) -> BufferKind {
        self.shared.storage.kind()
    }

    /// Number of items that can be written without overwriting data that a
    /// reader can still see.
    pub fn space_available(&self) -> usize {
        self.shared.space_available()
    }

    /// Returns the contiguous writable region. This never blocks; the region
    /// may be empty.
    pub fn write_slot(&mut self) -> WriteSlot<'_> {
        let items = self.shared.space_available();
        self.reported = items;
        let shared = &*self.shared;
        let offset = shared.offset_of(shared.write_index.load(Ordering::Relaxed));
        // SAFETY: offset is inside the first lap and items <= capacity, so the
        // region is inside the 2 * capacity_bytes storage. No reader can see
        // this region (see space_available), and only the writer, which is
        // borrowed mutably here, writes to the storage.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(
                shared.storage.as_mut_ptr().add(offset),
                items * shared.item_size,
            )
        };
        WriteSlot { bytes, items }
    }

    /// Publishes `n` items written to the last write slot.
    pub fn commit_write(&mut self, n: usize) -> Result<()> {
        if n > self.reported {
            return Err(Error::Overrun {
                requested: n,
                available: self.reported,
            });
        }
        if n == 0 {
            return Ok(());
        }
        let shared = &*self.shared;
        // Only the writer modifies the write index.
        let write = shared.write_index.load(Ordering::Relaxed);
        shared
            .storage
            .sync_mirror(shared.offset_of(write), n * shared.item_size);
        // Release so that readers that see the new index also see the data.
        shared.write_index.store(write + n as u64, Ordering::Release);
        self.reported -= n;
        shared.notify_readers();
        Ok(())
    }

    /// Attaches a reader that keeps `history` items of lookback. The reader
    /// starts at the current write index, so it sees no items yet.
    pub fn add_reader(&mut self, history: usize) -> Result<BufferReader> {
        self.attach_reader(history, None)
    }

    pub(crate) fn attach_reader(
        &mut self,
        history: usize,
        notifier: Option<Arc<Notifier>>,
    ) -> Result<BufferReader> {
        if history >= self.shared.capacity {
            return Err(Error::allocation(
                self.capacity_bytes(),
                format!(
                    "history of {history} items does not fit in a buffer of {} items",
                    self.shared.capacity
                ),
            ));
        }
        let reader = Arc::new(ReaderShared {
            read_index: AtomicU64::new(self.shared.write_index.load(Ordering::Relaxed)),
            history,
            notifier,
        });
        self.shared.lock_readers().push(Arc::clone(&reader));
        // a slot reported before this reader existed may now be too large
        self.reported = self.reported.min(self.shared.space_available());
        Ok(BufferReader::new(Arc::clone(&self.shared), reader))
    }

    /// Detaches `reader` from its buffer. This is the same as dropping it.
    pub fn remove_reader(&self, reader: BufferReader) {
        drop(reader);
    }

    pub fn reader_count(&self) -> usize {
        self.shared.lock_readers().len()
    }

    /// Attaches a tag to the absolute item index `tag.offset`.
    pub fn add_tag(&self, tag: Tag) {
        self.shared.lock_tags().insert(tag);
    }

    pub fn tag_count(&self) -> usize {
        self.shared.lock_tags().len()
    }

    /// Marks the stream as finished. Readers still see the items already
    /// committed.
    pub fn set_done(&self) {
        self.shared.done.store(true, Ordering::Release);
        self.shared.notify_readers();
    }

    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    pub fn nitems_written(&self) -> u64 {
        self.shared.write_index.load(Ordering::Relaxed)
    }

    /// Drops the writer end without marking the stream done.
    pub(crate) fn abandon(mut self) {
        self.done_on_drop = false;
    }

    /// Notifier raised when a reader consumes items or detaches.
    pub(crate) fn set_writer_notifier(&self, notifier: Arc<Notifier>) {
        // a buffer belongs to a single block for its whole life
        let _ = self.shared.writer.set(notifier);
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.done_on_drop {
            self.set_done();
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("kind", &self.kind())
            .field("item_size", &self.shared.item_size)
            .field("capacity", &self.shared.capacity)
            .field("nitems_written", &self.nitems_written())
            .field("readers", &self.reader_count())
            .field("done", &self.is_done())
            .finish()
    }
}

impl BufferShared {
    /// Byte offset in the first lap of the absolute item index `index`.
    fn offset_of(&self, index: u64) -> usize {
        (index % self.capacity as u64) as usize * self.item_size
    }

    fn space_available(&self) -> usize {
        let write = self.write_index.load(Ordering::Relaxed);
        let used = self
            .lock_readers()
            .iter()
            .map(|reader| {
                // Acquire pairs with the Release store in consume, so that the
                // reader is done with the bytes before they are overwritten.
                let read = reader.read_index.load(Ordering::Acquire);
                (write - read) as usize + reader.history
            })
            .max()
            .unwrap_or(0);
        self.capacity.saturating_sub(used)
    }

    fn notify_readers(&self) {
        for reader in self.lock_readers().iter() {
            if let Some(notifier) = &reader.notifier {
                notifier.notify_input();
            }
        }
    }

    fn notify_writer(&self) {
        if let Some(notifier) = self.writer.get() {
            notifier.notify_output();
        }
    }

    /// Drops the tags that no attached reader can reach anymore.
    fn prune_tags(&self) {
        let oldest = self
            .lock_readers()
            .iter()
            .map(|reader| {
                reader
                    .read_index
                    .load(Ordering::Relaxed)
                    .saturating_sub(reader.history as u64)
            })
            .min();
        if let Some(oldest) = oldest {
            self.lock_tags().prune_before(oldest);
        }
    }

    fn lock_readers(&self) -> MutexGuard<'_, Vec<Arc<ReaderShared>>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tags(&self) -> MutexGuard<'_, TagTable> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
