//! Merged subscribe request

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Method, Subscription};

/// Subscription id -> filter parameters, one per request bucket
pub type FilterMap = BTreeMap<String, serde_json::Value>;

/// Ping carried by an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub id: u32,
}

/// The single request describing the full subscription set
///
/// Each supported [`Method`] owns one bucket keyed by subscription id. The
/// server replaces its view of the subscription set with every request it
/// receives, so the request is always rebuilt from the complete registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[serde(default)]
    pub accounts: FilterMap,
    #[serde(default)]
    pub slots: FilterMap,
    #[serde(default)]
    pub transactions: FilterMap,
    #[serde(default)]
    pub transactions_status: FilterMap,
    #[serde(default)]
    pub blocks: FilterMap,
    #[serde(default)]
    pub blocks_meta: FilterMap,
    #[serde(default)]
    pub entry: FilterMap,
    /// Not a bucket: data slices apply to all account subscriptions
    #[serde(default)]
    pub accounts_data_slice: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<PingRequest>,
}

impl SubscribeRequest {
    /// Build the merged request from registered subscriptions
    pub fn from_subscriptions<'a, I>(subscriptions: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Subscription)>,
    {
        let mut request = Self::default();
        for (id, subscription) in subscriptions {
            request
                .bucket_mut(subscription.method)
                .insert(id.to_string(), subscription.params.clone());
        }
        request
    }

    /// A request whose only populated field is `ping`
    pub fn ping(id: u32) -> Self {
        Self {
            ping: Some(PingRequest { id }),
            ..Self::default()
        }
    }

    /// Filters registered under `method`
    pub fn bucket(&self, method: Method) -> &FilterMap {
        match method {
            Method::Accounts => &self.accounts,
            Method::Slots => &self.slots,
            Method::Transactions => &self.transactions,
            Method::TransactionsStatus => &self.transactions_status,
            Method::Blocks => &self.blocks,
            Method::BlocksMeta => &self.blocks_meta,
            Method::Entry => &self.entry,
        }
    }

    pub fn bucket_mut(&mut self, method: Method) -> &mut FilterMap {
        match method {
            Method::Accounts => &mut self.accounts,
            Method::Slots => &mut self.slots,
            Method::Transactions => &mut self.transactions,
            Method::TransactionsStatus => &mut self.transactions_status,
            Method::Blocks => &mut self.blocks,
            Method::BlocksMeta => &mut self.blocks_meta,
            Method::Entry => &mut self.entry,
        }
    }

    /// Non-empty buckets, in request field order
    pub fn buckets(&self) -> impl Iterator<Item = (Method, &FilterMap)> {
        Method::ALL
            .into_iter()
            .map(move |method| (method, self.bucket(method)))
            .filter(|(_, bucket)| !bucket.is_empty())
    }

    /// Total number of filters across all buckets
    pub fn subscription_count(&self) -> usize {
        Method::ALL.iter().map(|m| self.bucket(*m).len()).sum()
    }

    pub fn is_ping(&self) -> bool {
        self.ping.is_some()
    }
}
