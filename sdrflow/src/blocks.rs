pub mod basic {
    mod copy;
    pub use copy::Copy;
    mod head;
    pub use head::Head;
    mod keep_one_in_n;
    pub use keep_one_in_n::KeepOneInN;
    mod moving_average;
    pub use moving_average::MovingAverage;
    mod null_sink;
    pub use null_sink::NullSink;
    mod null_source;
    pub use null_source::NullSource;
    mod repeat;
    pub use repeat::Repeat;
    mod vector_sink;
    pub use vector_sink::{VectorSink, VectorSinkData};
    mod vector_source;
    pub use vector_source::VectorSource;
}
pub mod message {
    mod message_burst;
    pub use message_burst::MessageBurst;
    mod message_sink;
    pub use message_sink::{MessageSink, MessageSinkData};
}
