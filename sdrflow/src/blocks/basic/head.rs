use crate::prelude::*;
use std::marker::PhantomData;

/// Passes the first `count` items through and then finishes.
#[derive(Debug)]
pub struct Head<T> {
    count: u64,
    remaining: u64,
    _item: PhantomData<T>,
}

impl<T: Item> Head<T> {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            remaining: count,
            _item: PhantomData,
        }
    }
}

impl<T: Item> Block for Head<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "head",
            IoSignature::exactly::<T>(1),
            IoSignature::exactly::<T>(1),
        )
    }

    fn start(&mut self) -> Result<()> {
        self.remaining = self.count;
        Ok(())
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let n = io
            .noutput_items()
            .min(io.inputs[0].available())
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let input = &io.inputs[0].items::<T>()[..n];
        io.outputs[0].items_mut::<T>()[..n].copy_from_slice(input);
        io.consume_each(n);
        io.produce_each(n);
        self.remaining -= n as u64;
        if self.remaining == 0 {
            Ok(DoneWithOutput)
        } else {
            Ok(Run)
        }
    }
}
