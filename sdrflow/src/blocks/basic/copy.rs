use crate::prelude::*;
use std::marker::PhantomData;

/// Copies its input to its output.
#[derive(Debug)]
pub struct Copy<T> {
    _item: PhantomData<T>,
}

impl<T: Item> Copy<T> {
    pub fn new() -> Self {
        Self {
            _item: PhantomData,
        }
    }
}

impl<T: Item> Default for Copy<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for Copy<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "copy",
            IoSignature::exactly::<T>(1),
            IoSignature::exactly::<T>(1),
        )
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let n = io.noutput_items().min(io.inputs[0].available());
        let input = &io.inputs[0].items::<T>()[..n];
        io.outputs[0].items_mut::<T>()[..n].copy_from_slice(input);
        io.consume_each(n);
        io.produce_each(n);
        Ok(Run)
    }
}
