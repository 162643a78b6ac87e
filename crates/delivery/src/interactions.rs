//! Interaction log port — who opened or clicked which messages.

use std::collections::HashSet;

use dashmap::DashMap;
use dripline_core::FlowResult;
use uuid::Uuid;

/// Given a set of message ids and a person set, answer who interacted.
pub trait InteractionLog: Send + Sync {
    fn openers(&self, message_ids: &[Uuid], people: &HashSet<String>)
        -> FlowResult<HashSet<String>>;

    fn clickers(
        &self,
        message_ids: &[Uuid],
        people: &HashSet<String>,
    ) -> FlowResult<HashSet<String>>;
}

/// Null-object log reporting no interactions.
pub struct NoInteractions;

impl InteractionLog for NoInteractions {
    fn openers(&self, _: &[Uuid], _: &HashSet<String>) -> FlowResult<HashSet<String>> {
        Ok(HashSet::new())
    }

    fn clickers(&self, _: &[Uuid], _: &HashSet<String>) -> FlowResult<HashSet<String>> {
        Ok(HashSet::new())
    }
}

/// In-memory interaction log, keyed by message id.
#[derive(Default)]
pub struct InMemoryInteractions {
    opens: DashMap<Uuid, HashSet<String>>,
    clicks: DashMap<Uuid, HashSet<String>>,
}

impl InMemoryInteractions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self, message_id: Uuid, person: &str) {
        self.opens
            .entry(message_id)
            .or_default()
            .insert(person.to_string());
    }

    pub fn record_click(&self, message_id: Uuid, person: &str) {
        self.clicks
            .entry(message_id)
            .or_default()
            .insert(person.to_string());
    }

    fn collect(
        index: &DashMap<Uuid, HashSet<String>>,
        message_ids: &[Uuid],
        people: &HashSet<String>,
    ) -> HashSet<String> {
        let mut out = HashSet::new();
        for id in message_ids {
            if let Some(entry) = index.get(id) {
                out.extend(entry.intersection(people).cloned());
            }
        }
        out
    }
}

impl InteractionLog for InMemoryInteractions {
    fn openers(
        &self,
        message_ids: &[Uuid],
        people: &HashSet<String>,
    ) -> FlowResult<HashSet<String>> {
        Ok(Self::collect(&self.opens, message_ids, people))
    }

    fn clickers(
        &self,
        message_ids: &[Uuid],
        people: &HashSet<String>,
    ) -> FlowResult<HashSet<String>> {
        Ok(Self::collect(&self.clicks, message_ids, people))
    }
}
