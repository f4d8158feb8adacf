use crate::prelude::*;

/// Posts `count` messages on its `out` port and finishes.
///
/// The messages are `Pmt::U64` values counting from zero.
#[derive(Debug)]
pub struct MessageBurst {
    count: u64,
}

impl MessageBurst {
    pub fn new(count: u64) -> Self {
        Self { count }
    }
}

impl Block for MessageBurst {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("message_burst", IoSignature::empty(), IoSignature::empty())
            .with_message_outputs(["out"])
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        for n in 0..self.count {
            io.post("out", n)?;
        }
        Ok(DoneWithoutOutput)
    }
}
