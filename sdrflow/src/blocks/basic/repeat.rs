use crate::prelude::*;
use std::marker::PhantomData;

/// Interpolator that repeats each item `n` times.
#[derive(Debug)]
pub struct Repeat<T> {
    n: usize,
    _item: PhantomData<T>,
}

impl<T: Item> Repeat<T> {
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "interpolation must be positive");
        Self {
            n,
            _item: PhantomData,
        }
    }
}

impl<T: Item> Block for Repeat<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "repeat",
            IoSignature::exactly::<T>(1),
            IoSignature::exactly::<T>(1),
        )
        .with_relative_rate(RelativeRate::new(self.n as u64, 1))
        .with_output_multiple(self.n)
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let ninput = (io.noutput_items() / self.n).min(io.inputs[0].available());
        let input = &io.inputs[0].items::<T>()[..ninput];
        let output = io.outputs[0].items_mut::<T>();
        for (chunk, x) in output.chunks_exact_mut(self.n).zip(input) {
            chunk.fill(*x);
        }
        io.inputs[0].consume(ninput);
        io.outputs[0].produce(ninput * self.n);
        Ok(Run)
    }
}
