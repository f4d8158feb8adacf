use crate::prelude::*;
use std::marker::PhantomData;

/// Decimator that keeps the first of every `n` items.
#[derive(Debug)]
pub struct KeepOneInN<T> {
    n: usize,
    _item: PhantomData<T>,
}

impl<T: Item> KeepOneInN<T> {
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "decimation must be positive");
        Self {
            n,
            _item: PhantomData,
        }
    }
}

impl<T: Item> Block for KeepOneInN<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "keep_one_in_n",
            IoSignature::exactly::<T>(1),
            IoSignature::exactly::<T>(1),
        )
        .with_relative_rate(RelativeRate::new(1, self.n as u64))
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let noutput = io.noutput_items().min(io.inputs[0].available() / self.n);
        let input = io.inputs[0].items::<T>();
        let output = io.outputs[0].items_mut::<T>();
        for (out, x) in output.iter_mut().zip(input.iter().step_by(self.n)).take(noutput) {
            *out = *x;
        }
        io.inputs[0].consume(noutput * self.n);
        io.outputs[0].produce(noutput);
        Ok(Run)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        Tag,
        blocks::basic::{VectorSink, VectorSource},
    };

    #[test]
    fn decimates_items_and_tags() {
        let mut fg = Flowgraph::new();
        let source = fg.add_block(
            VectorSource::new((0..10_000u32).collect())
                .with_tags(vec![Tag::new(0, "a", 0u64), Tag::new(503, "b", 1u64)]),
        );
        let keep = fg.add_block(KeepOneInN::<u32>::new(5));
        let sink = VectorSink::<u32>::new();
        let received = sink.data();
        let sink = fg.add_block(sink);
        fg.connect(source, keep).unwrap();
        fg.connect(keep, sink).unwrap();
        Runtime::new().run(fg).unwrap();

        assert_eq!(received.items(), (0..10_000).step_by(5).collect::<Vec<_>>());
        let offsets = received
            .tags()
            .iter()
            .map(|tag| tag.offset)
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 100]);
    }
}
