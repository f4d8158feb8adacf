use crate::prelude::*;
use std::marker::PhantomData;

/// Produces zeros forever.
#[derive(Debug)]
pub struct NullSource<T> {
    _item: PhantomData<T>,
}

impl<T: Item> NullSource<T> {
    pub fn new() -> Self {
        Self {
            _item: PhantomData,
        }
    }
}

impl<T: Item> Default for NullSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for NullSource<T> {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "null_source",
            IoSignature::empty(),
            IoSignature::exactly::<T>(1),
        )
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let output = &mut io.outputs[0];
        output.bytes_mut().fill(0);
        output.produce(output.len());
        Ok(Run)
    }
}
