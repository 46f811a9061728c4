//! Progress delivery.
//!
//! The runner emits [`ProgressEvent`](crate::core::ProgressEvent)s into a
//! [`ProgressSink`] and stays unaware of how they reach the caller.

mod sink;
mod stream;

pub use sink::{
    CollectingProgressSink, FanoutProgressSink, LoggingProgressSink, NoOpProgressSink,
    ProgressSink,
};
pub use stream::{progress_channel, ChannelProgressSink, ProgressStream};
