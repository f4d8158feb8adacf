use crate::{Tag, prelude::*};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Stores every item it receives, and the tags attached to them.
///
/// The stored items are read through a [`VectorSinkData`] handle, obtained
/// with [`data`](VectorSink::data) before the block is added to a flowgraph.
#[derive(Debug)]
pub struct VectorSink<T> {
    data: VectorSinkData<T>,
}

/// Shared handle to the contents of a [`VectorSink`].
#[derive(Debug)]
pub struct VectorSinkData<T> {
    inner: Arc<Mutex<Received<T>>>,
}

#[derive(Debug)]
struct Received<T> {
    items: Vec<T>,
    tags: Vec<Tag>,
}

impl<T> Clone for VectorSinkData<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Item> VectorSinkData<T> {
    fn lock(&self) -> MutexGuard<'_, Received<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    /// Received tags. Offsets are absolute indices of the input stream.
    pub fn tags(&self) -> Vec<Tag> {
        self.lock().tags.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Item> VectorSink<T> {
    pub fn new() -> Self {
        Self {
            data: VectorSinkData {
                inner: Arc::new(Mutex::new(Received {
                    items: Vec::new(),
                    tags: Vec::new(),
                })),
            },
        }
    }

    pub fn data(&self) -> VectorSinkData<T> {
        self.data.clone()
    }
}

impl<T: Item> Default for VectorSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for VectorSink<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "vector_sink",
            IoSignature::exactly::<T>(1),
            IoSignature::empty(),
        )
    }

    fn start(&mut self) -> Result<()> {
        let mut received = self.data.lock();
        received.items.clear();
        received.tags.clear();
        Ok(())
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let input = &mut io.inputs[0];
        let items = input.items::<T>();
        let tags = input.tags();
        let mut received = self.data.lock();
        received.items.extend_from_slice(items);
        received.tags.extend(tags);
        input.consume(items.len());
        Ok(Run)
    }
}
