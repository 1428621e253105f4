//! Subscription registry

use std::sync::Arc;

use geyser_core::{SubscribeRequest, Subscription};

use crate::error::{ClientError, Result};

/// Point-in-time copy of the registry, in registration order
pub type SubscriptionSnapshot = Arc<Vec<(String, Subscription)>>;

/// Registered subscriptions keyed by unique id
///
/// Entries keep their registration order so that snapshots and merged
/// requests are deterministic.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<(String, Subscription)>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscription` under `id`
    pub fn add(&mut self, id: impl Into<String>, subscription: Subscription) -> Result<()> {
        let id = id.into();
        if self.has(&id) {
            return Err(ClientError::DuplicateSubscriptionId(id));
        }
        self.entries.push((id, subscription));
        Ok(())
    }

    /// Remove the entry for `id`, returning it if present
    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        let index = self.entries.iter().position(|(key, _)| key == id)?;
        Some(self.entries.remove(index).1)
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == id)
    }

    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, subscription)| subscription)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Subscription)> {
        self.entries
            .iter()
            .map(|(id, subscription)| (id.as_str(), subscription))
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        Arc::new(self.entries.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Merged request describing every registered subscription
    pub fn build_request(&self) -> SubscribeRequest {
        SubscribeRequest::from_subscriptions(self.iter())
    }
}
