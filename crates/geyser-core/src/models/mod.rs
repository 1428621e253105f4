//! Stream data models

mod method;
mod request;
mod subscription;
mod update;

pub use method::Method;
pub use request::{FilterMap, PingRequest, SubscribeRequest};
pub use subscription::Subscription;
pub use update::{PingUpdate, PongUpdate, SubscribeUpdate, UpdateOneof};
