//! Transport abstraction layer
//!
//! The client talks to the server through a [`StreamTransport`] that opens
//! one bidirectional stream per session. Two implementations ship with the
//! crate:
//!
//! - [`JsonLinesTransport`]: newline-delimited JSON over TCP
//! - [`MockTransport`]: in-memory stream for tests

mod adapter;
mod error;
pub mod json_lines;
pub mod mock;

pub use adapter::{OpenedStream, StreamHandle, StreamSignal, StreamTransport};
pub use error::TransportError;
pub use json_lines::JsonLinesTransport;
pub use mock::{MockConfig, MockStream, MockTransport};
