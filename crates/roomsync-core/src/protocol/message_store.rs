//! Deduplicated Message Storage
//!
//! Holds exactly one record per correlation key. Every write goes through
//! [`MessageStore::upsert`], which either materializes a new record or folds
//! the update into the existing one with the reconciler. A secondary index
//! on server id catches the same persisted message arriving under two
//! different derived keys.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::protocol::message::{Message, MessageUpdate};
use crate::protocol::reconciler::{materialize, reconcile};
use crate::types::{CorrelationKey, ServerId};

/// What a single upsert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created under this key
    Inserted(CorrelationKey),
    /// The record under this key changed
    Merged(CorrelationKey),
    /// The update was absorbed by this record without changing it
    Unchanged(CorrelationKey),
}

impl UpsertOutcome {
    /// Key of the record the update landed on
    pub fn key(&self) -> &CorrelationKey {
        match self {
            UpsertOutcome::Inserted(key)
            | UpsertOutcome::Merged(key)
            | UpsertOutcome::Unchanged(key) => key,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }

    pub fn changed(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStoreStats {
    pub records: usize,
    pub inserted: u64,
    pub merged: u64,
    pub duplicates_suppressed: u64,
    pub regressions_blocked: u64,
}

// ----------------------------------------------------------------------------
// Message Store Implementation
// ----------------------------------------------------------------------------

/// Ordered, deduplicated collection of chat records
#[derive(Debug, Default)]
pub struct MessageStore {
    /// Records indexed by correlation key
    records: HashMap<CorrelationKey, Message>,
    /// Correlation key of the record that owns each server id
    by_server_id: HashMap<ServerId, CorrelationKey>,
    stats: MessageStoreStats,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge one update
    pub fn upsert(&mut self, update: MessageUpdate) -> Result<UpsertOutcome, StoreError> {
        let key = self.resolve_key(&update);

        let Some(existing) = self.records.get(&key) else {
            let message = materialize(update)?;
            if let Some(server_id) = &message.server_id {
                self.by_server_id
                    .entry(server_id.clone())
                    .or_insert_with(|| key.clone());
            }
            self.records.insert(key.clone(), message);
            self.stats.inserted += 1;
            self.stats.records = self.records.len();
            return Ok(UpsertOutcome::Inserted(key));
        };

        let update = if update.correlation_key != key {
            debug!(
                incoming = %update.correlation_key,
                existing = %key,
                "Folding update into record with the same server id"
            );
            update.rekeyed(key.clone())
        } else {
            update
        };

        let result = reconcile(existing, &update);
        if result.regression_blocked {
            self.stats.regressions_blocked += 1;
            debug!(
                key = %key,
                state = %existing.delivery_state,
                "Blocked delivery state regression"
            );
        }

        if &result.message == existing {
            self.stats.duplicates_suppressed += 1;
            return Ok(UpsertOutcome::Unchanged(key));
        }

        if result.message.server_id != existing.server_id {
            if let Some(server_id) = &result.message.server_id {
                self.bind_server_id(server_id, &key);
            }
        }
        self.records.insert(key.clone(), result.message);
        self.stats.merged += 1;
        Ok(UpsertOutcome::Merged(key))
    }

    /// Merge a history snapshot into the store
    ///
    /// Records already present (in-flight optimistic sends included) are
    /// reconciled rather than replaced. Returns the number of updates that
    /// landed.
    pub fn snapshot_replace(&mut self, updates: Vec<MessageUpdate>) -> usize {
        let mut applied = 0;
        for update in updates {
            let key = update.correlation_key.clone();
            match self.upsert(update) {
                Ok(_) => applied += 1,
                Err(e) => warn!(key = %key, "Skipping history record: {}", e),
            }
        }
        applied
    }

    /// Render-ordered copy of every record
    ///
    /// Confirmed records come first, ascending by server time (ties broken by
    /// server id, then key), followed by pending and failed records ascending
    /// by client time.
    pub fn list(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.records.values().cloned().collect();
        messages.sort_by(render_order);
        messages
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<&Message> {
        self.records.get(key)
    }

    /// Key of the record holding a server id
    pub fn key_for_server_id(&self, server_id: &ServerId) -> Option<&CorrelationKey> {
        self.by_server_id.get(server_id)
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> &MessageStoreStats {
        &self.stats
    }

    fn resolve_key(&self, update: &MessageUpdate) -> CorrelationKey {
        if self.records.contains_key(&update.correlation_key) {
            return update.correlation_key.clone();
        }
        update
            .server_id
            .as_ref()
            .and_then(|server_id| self.by_server_id.get(server_id))
            .cloned()
            .unwrap_or_else(|| update.correlation_key.clone())
    }

    fn bind_server_id(&mut self, server_id: &ServerId, key: &CorrelationKey) {
        match self.by_server_id.get(server_id) {
            Some(owner) if owner != key => {
                warn!(
                    server_id = %server_id,
                    owner = %owner,
                    key = %key,
                    "Server id already bound to another record"
                );
            }
            Some(_) => {}
            None => {
                self.by_server_id.insert(server_id.clone(), key.clone());
            }
        }
    }
}

fn render_order(a: &Message, b: &Message) -> core::cmp::Ordering {
    match (a.is_confirmed(), b.is_confirmed()) {
        (true, false) => core::cmp::Ordering::Less,
        (false, true) => core::cmp::Ordering::Greater,
        (true, true) => a
            .server_time
            .cmp(&b.server_time)
            .then_with(|| a.server_id.cmp(&b.server_id))
            .then_with(|| a.correlation_key.cmp(&b.correlation_key)),
        (false, false) => a
            .client_time
            .cmp(&b.client_time)
            .then_with(|| a.correlation_key.cmp(&b.correlation_key)),
    }
}
