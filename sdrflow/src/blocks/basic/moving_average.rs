use crate::prelude::*;

/// Average of the last `length` input items.
///
/// The first `length - 1` outputs average over the zeros that precede the
/// stream.
#[derive(Debug)]
pub struct MovingAverage {
    length: usize,
}

impl MovingAverage {
    /// # Panics
    ///
    /// Panics if `length` is zero.
    pub fn new(length: usize) -> Self {
        assert!(length > 0, "moving average length must be positive");
        Self { length }
    }
}

impl Block for MovingAverage {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "moving_average",
            IoSignature::exactly::<f32>(1),
            IoSignature::exactly::<f32>(1),
        )
        .with_history(self.length - 1)
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let n = io.noutput_items().min(io.inputs[0].available());
        let input = io.inputs[0].items_with_history::<f32>();
        let output = io.outputs[0].items_mut::<f32>();
        let scale = 1.0 / self.length as f32;
        for (out, window) in output.iter_mut().zip(input.windows(self.length)).take(n) {
            *out = window.iter().sum::<f32>() * scale;
        }
        io.consume_each(n);
        io.produce_each(n);
        Ok(Run)
    }
}
