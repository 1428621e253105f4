//! geyser-core - Core types for the geyser subscription stream
//!
//! This crate holds the data model shared by the client and its transports:
//! the supported stream categories ([`Method`]), registered
//! [`Subscription`]s, the merged [`SubscribeRequest`] written to the stream and
//! the [`SubscribeUpdate`] messages pushed back by the server.

pub mod error;
pub mod models;

pub use error::{CoreError, CoreResult};
pub use models::*;
