//! Inbound stream messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Method;

/// Server ping (the peer asks for the current subscription set)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingUpdate {}

/// Reply to a client ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongUpdate {
    pub id: u32,
}

/// Payload of an inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateOneof {
    Account(serde_json::Value),
    Slot(serde_json::Value),
    Transaction(serde_json::Value),
    TransactionStatus(serde_json::Value),
    Block(serde_json::Value),
    BlockMeta(serde_json::Value),
    Entry(serde_json::Value),
    Ping(PingUpdate),
    Pong(PongUpdate),
}

/// A message pushed by the server
///
/// `filters` lists the ids of the subscriptions this update matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeUpdate {
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub update: UpdateOneof,
}

impl SubscribeUpdate {
    pub fn new(filters: Vec<String>, update: UpdateOneof) -> Self {
        Self {
            filters,
            created_at: None,
            update,
        }
    }

    pub fn ping() -> Self {
        Self::new(Vec::new(), UpdateOneof::Ping(PingUpdate {}))
    }

    pub fn pong(id: u32) -> Self {
        Self::new(Vec::new(), UpdateOneof::Pong(PongUpdate { id }))
    }

    /// Stream category of a data update; `None` for ping and pong
    pub fn method(&self) -> Option<Method> {
        match self.update {
            UpdateOneof::Account(_) => Some(Method::Accounts),
            UpdateOneof::Slot(_) => Some(Method::Slots),
            UpdateOneof::Transaction(_) => Some(Method::Transactions),
            UpdateOneof::TransactionStatus(_) => Some(Method::TransactionsStatus),
            UpdateOneof::Block(_) => Some(Method::Blocks),
            UpdateOneof::BlockMeta(_) => Some(Method::BlocksMeta),
            UpdateOneof::Entry(_) => Some(Method::Entry),
            UpdateOneof::Ping(_) | UpdateOneof::Pong(_) => None,
        }
    }

    pub fn is_ping(&self) -> bool {
        matches!(self.update, UpdateOneof::Ping(_))
    }

    pub fn pong_id(&self) -> Option<u32> {
        match self.update {
            UpdateOneof::Pong(PongUpdate { id }) => Some(id),
            _ => None,
        }
    }
}
