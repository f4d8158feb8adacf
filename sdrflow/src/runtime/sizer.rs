use super::{
    block::{BlockInfo, lcm},
    buffer::{Buffer, BufferKind, CACHE_LINE_SIZE, page_size},
    config::RuntimeConfig,
    error::{Error, Result},
    flatten::FlatGraph,
    port::PortRef,
};

/// Computes and allocates the buffer of every connected output port.
#[derive(Debug, Clone)]
pub struct BufferSizer {
    default_bytes: usize,
    max_bytes: usize,
    kind: BufferKind,
}

/// Reader of a planned buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ReaderPlan {
    pub dest: PortRef,
    pub history: usize,
    /// Input items the reader needs to produce one output multiple.
    pub min_batch: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BufferPlan {
    pub source: PortRef,
    pub item_size: usize,
    pub capacity_items: usize,
    pub capacity_bytes: usize,
    pub kind: BufferKind,
    pub readers: Vec<ReaderPlan>,
}

impl BufferSizer {
    pub fn new(config: &RuntimeConfig) -> BufferSizer {
        BufferSizer {
            default_bytes: config.default_buffer_bytes,
            max_bytes: config.max_buffer_bytes,
            kind: config.buffer_kind,
        }
    }

    pub fn plan(&self, graph: &FlatGraph) -> Result<Vec<BufferPlan>> {
        let mut plans = Vec::new();
        for source in graph.sources() {
            let Some(producer) = graph.block(source.block) else {
                continue;
            };
            let mut item_size = 0;
            let mut readers = Vec::new();
            for edge in graph.readers_of(source) {
                item_size = edge.item_size;
                if let Some(dest) = graph.block(edge.dst.block) {
                    readers.push(ReaderPlan {
                        dest: edge.dst,
                        history: dest.info.history,
                        min_batch: dest.info.min_batch(),
                    });
                }
            }
            let plan = self.plan_output(source, &producer.info, item_size, readers)?;
            tracing::debug!(
                block = %producer.name,
                port = source.port,
                items = plan.capacity_items,
                bytes = plan.capacity_bytes,
                kind = %plan.kind,
                "planned buffer"
            );
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Plans the buffer of one output port of `producer`.
    pub fn plan_output(
        &self,
        source: PortRef,
        producer: &BlockInfo,
        item_size: usize,
        readers: Vec<ReaderPlan>,
    ) -> Result<BufferPlan> {
        if item_size == 0 {
            return Err(Error::allocation(0, "item size is zero"));
        }
        let output_multiple = producer.output_multiple.max(1);
        let required = readers
            .iter()
            .map(|r| r.history + r.min_batch)
            .max()
            .unwrap_or(0)
            + output_multiple;
        // every batch size divides the capacity in items
        let batch = readers
            .iter()
            .fold(output_multiple as u64, |acc, r| lcm(acc, r.min_batch.max(1) as u64));
        let batch =
            usize::try_from(batch).map_err(|_| Error::allocation(usize::MAX, "batch overflow"))?;
        let items = required.max(self.default_bytes / item_size).max(1);
        let items = items.div_ceil(batch) * batch;

        let round = |align: usize| -> Option<usize> {
            let granularity = lcm((item_size * batch) as u64, align as u64);
            let granularity = usize::try_from(granularity).ok()?;
            (items * item_size)
                .checked_next_multiple_of(granularity)
                .filter(|&bytes| bytes <= self.max_bytes)
        };
        let (bytes, kind) = match self.kind {
            BufferKind::Heap => (round(CACHE_LINE_SIZE), BufferKind::Heap),
            BufferKind::DoubleMapped => (round(page_size()), BufferKind::DoubleMapped),
            // page alignment may not fit, cache line alignment is enough for
            // heap storage
            BufferKind::Auto => match round(page_size()) {
                Some(bytes) => (Some(bytes), BufferKind::Auto),
                None => (round(CACHE_LINE_SIZE), BufferKind::Heap),
            },
        };
        let bytes = bytes.ok_or_else(|| {
            Error::allocation(
                items * item_size,
                format!("exceeds the maximum buffer size of {} bytes", self.max_bytes),
            )
        })?;

        Ok(BufferPlan {
            source,
            item_size,
            capacity_items: bytes / item_size,
            capacity_bytes: bytes,
            kind,
            readers,
        })
    }

    pub fn allocate(&self, plan: &BufferPlan) -> Result<Buffer> {
        Buffer::allocate_with(plan.capacity_bytes, plan.item_size, plan.kind)
    }
}
