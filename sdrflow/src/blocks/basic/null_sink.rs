use crate::prelude::*;
use std::marker::PhantomData;

/// Consumes and discards every item.
#[derive(Debug)]
pub struct NullSink<T> {
    _item: PhantomData<T>,
}

impl<T: Item> NullSink<T> {
    pub fn new() -> Self {
        Self {
            _item: PhantomData,
        }
    }
}

impl<T: Item> Default for NullSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for NullSink<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "null_sink",
            IoSignature::exactly::<T>(1),
            IoSignature::empty(),
        )
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let input = &mut io.inputs[0];
        input.consume(input.available());
        Ok(Run)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blocks::basic::{Head, NullSource};

    #[test]
    fn null_source_to_sink() {
        let mut fg = Flowgraph::new();
        let source = fg.add_block(NullSource::<u64>::new());
        let head = fg.add_block(Head::<u64>::new(100_000));
        let sink = fg.add_block(NullSink::<u64>::new());
        fg.connect(source, head).unwrap();
        fg.connect(head, sink).unwrap();
        let report = Runtime::new().run(fg).unwrap();
        assert_eq!(report.block("null_sink_0").unwrap().items_read, vec![100_000]);
    }
}
