//! The output engine
//!
//! [`engine`] is the thread-safe facade the decoder talks to; [`worker`]
//! is the playback thread that drains segments into the selected sink.

pub mod engine;
pub(crate) mod worker;
