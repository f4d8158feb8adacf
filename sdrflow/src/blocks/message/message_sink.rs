use crate::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};

/// Collects the messages received on its `in` port.
#[derive(Debug, Default)]
pub struct MessageSink {
    data: MessageSinkData,
}

/// Shared handle to the messages received by a [`MessageSink`].
#[derive(Debug, Clone, Default)]
pub struct MessageSinkData {
    messages: Arc<Mutex<Vec<Pmt>>>,
}

impl MessageSinkData {
    pub fn messages(&self) -> Vec<Pmt> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> MessageSinkData {
        self.data.clone()
    }
}

impl Block for MessageSink {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("message_sink", IoSignature::empty(), IoSignature::empty())
            .with_message_inputs(["in"])
    }

    fn work(&mut self, _: &mut WorkIo<'_>) -> Result<WorkStatus> {
        Ok(DoneWithoutOutput)
    }

    fn handle_message(&mut self, _: &str, msg: Pmt, _: &MessageOutputs) -> Result<()> {
        self.data
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blocks::message::MessageBurst;

    #[test]
    fn burst_is_received_in_order() {
        let mut fg = Flowgraph::new();
        let burst = fg.add_block(MessageBurst::new(20_000));
        let sink = MessageSink::new();
        let received = sink.data();
        let sink = fg.add_block(sink);
        fg.msg_connect((burst, "out"), (sink, "in")).unwrap();
        let config = RuntimeConfig::default().with_message_queue_bound(16);
        Runtime::with_config(config).run(fg).unwrap();

        let messages = received.messages();
        assert_eq!(messages.len(), 20_000);
        for (n, msg) in messages.iter().enumerate() {
            assert_eq!(msg.as_u64(), Some(n as u64));
        }
    }
}
