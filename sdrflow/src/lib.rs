pub mod blocks;
mod runtime;
pub use runtime::{
    block::{Block, BlockInfo, RelativeRate, TagPropagation},
    config::RuntimeConfig,
    error::{BlockFailure, Error, Result, TopologyError},
    flatten::{FlatBlock, FlatEdge, FlatGraph, FlatMessageEdge},
    flowgraph::{Edge, Flowgraph, HierBlock, MessageEdge},
    item::Item,
    pmt::Pmt,
    registry::{BlockId, BlockRegistry},
    tag::Tag,
    top::{BlockReport, RunReport, Runtime},
    work::{
        InputSlot, OutputSlot, WorkIo, WorkStatus,
        WorkStatus::{DoneWithOutput, DoneWithoutOutput, Run},
    },
};
pub mod buffers {
    pub use crate::runtime::buffer::{
        Buffer, BufferKind, BufferReader, CACHE_LINE_SIZE, DoubleMappedStorage, HeapStorage,
        RingStorage, WriteSlot, page_size,
    };
    pub use crate::runtime::sizer::{BufferPlan, BufferSizer, ReaderPlan};
    pub use crate::runtime::tag::TagTable;
}
pub mod ports {
    pub use crate::runtime::port::{
        Direction, Endpoint, IoSignature, MessageEndpoint, NodeRef, PortRef,
    };
}
pub mod messages {
    pub use crate::runtime::message::{MessageOutputs, MessageQueue};
}
pub mod scheduler {
    pub use crate::runtime::scheduler::{BlockPhase, BlockStatus};
}

pub mod prelude {
    pub use crate::{
        Block, BlockInfo, DoneWithOutput, DoneWithoutOutput, Flowgraph, Item, Pmt, RelativeRate,
        Run, Runtime, RuntimeConfig, TagPropagation, WorkIo, WorkStatus,
        messages::MessageOutputs,
        ports::{Endpoint, IoSignature, MessageEndpoint},
    };
    pub use anyhow::Result;
}
