pub mod block;
pub mod buffer;
pub mod config;
pub mod error;
pub mod flatten;
pub mod flowgraph;
pub mod item;
pub mod message;
pub(crate) mod notify;
pub mod pmt;
pub mod port;
pub mod registry;
pub mod scheduler;
pub mod sizer;
pub mod tag;
pub mod top;
pub mod work;
