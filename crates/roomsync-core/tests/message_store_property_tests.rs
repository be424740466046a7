//! Property-based tests for message store reconciliation
//!
//! These tests verify the store's invariants under arbitrary interleavings of
//! optimistic inserts, confirmations, failures, history records and live
//! echoes: one record per key, forward-only delivery, and render order.

use proptest::prelude::*;
use roomsync_core::{
    CorrelationKey, Delivery, DeliveryState, DeviceId, MessageStore, MessageUpdate, Origin,
    ServerId, Timestamp, UpsertOutcome,
};
use std::collections::{HashMap, HashSet};

/// Small key pool so updates collide often
fn arb_key() -> impl Strategy<Value = CorrelationKey> {
    (0u8..6).prop_map(|i| CorrelationKey::new(format!("key-{}", i)))
}

fn arb_server_id() -> impl Strategy<Value = Option<ServerId>> {
    prop::option::of((0u8..6).prop_map(|i| ServerId::new(i.to_string())))
}

fn arb_device() -> impl Strategy<Value = DeviceId> {
    prop::sample::select(vec!["me", "alice", "bob"]).prop_map(DeviceId::new)
}

fn arb_time() -> impl Strategy<Value = Timestamp> {
    (0u64..10_000).prop_map(Timestamp::new)
}

fn arb_text() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-z][a-z ]{0,20}").unwrap()
}

/// Every shape of update the engine produces
fn arb_update() -> impl Strategy<Value = MessageUpdate> {
    prop_oneof![
        // Optimistic local record
        (arb_key(), arb_text(), arb_time()).prop_map(|(key, text, at)| {
            MessageUpdate::local_pending(key, DeviceId::new("me"), text, at)
        }),
        // History record or live echo
        (arb_key(), arb_device(), arb_text(), arb_time(), arb_server_id()).prop_map(
            |(key, device, text, at, server_id)| {
                let origin = if device.as_str() == "me" {
                    Origin::Local
                } else {
                    Origin::Remote
                };
                MessageUpdate::confirmed(key, device, text, at, origin).with_server_id(server_id)
            }
        ),
        // Live echo without a server time
        (arb_key(), arb_device(), arb_text(), arb_time()).prop_map(|(key, device, text, at)| {
            MessageUpdate::confirmed(key, device, text, at, Origin::Remote)
                .with_delivery(Delivery::Echoed { received_at: at })
        }),
        // Persistence response
        (arb_key(), arb_time(), arb_server_id())
            .prop_map(|(key, at, server_id)| MessageUpdate::confirmation(key, at)
                .with_server_id(server_id)),
        // Persistence failure
        arb_key().prop_map(MessageUpdate::failure),
        // Regression attempt
        arb_key().prop_map(|key| MessageUpdate::for_key(key).with_delivery(Delivery::Pending)),
    ]
}

proptest! {
    /// Property: exactly one record per correlation key
    #[test]
    fn one_record_per_key(updates in prop::collection::vec(arb_update(), 1..60)) {
        let mut store = MessageStore::new();
        for update in updates {
            let _ = store.upsert(update);
        }

        let list = store.list();
        let keys: HashSet<_> = list.iter().map(|m| m.correlation_key.clone()).collect();
        prop_assert_eq!(keys.len(), list.len());
        prop_assert_eq!(list.len(), store.len());
    }

    /// Property: Confirmed and Failed are terminal
    #[test]
    fn delivery_state_only_moves_forward(updates in prop::collection::vec(arb_update(), 1..60)) {
        let mut store = MessageStore::new();
        let mut terminal: HashMap<CorrelationKey, DeliveryState> = HashMap::new();

        for update in updates {
            let _ = store.upsert(update);
            for message in store.list() {
                if let Some(previous) = terminal.get(&message.correlation_key) {
                    prop_assert_eq!(*previous, message.delivery_state);
                }
                if message.delivery_state != DeliveryState::Pending {
                    terminal.insert(message.correlation_key.clone(), message.delivery_state);
                }
            }
        }
    }

    /// Property: server time is present exactly when confirmed
    #[test]
    fn server_time_tracks_confirmation(updates in prop::collection::vec(arb_update(), 1..60)) {
        let mut store = MessageStore::new();
        for update in updates {
            let _ = store.upsert(update);
        }
        for message in store.list() {
            prop_assert_eq!(message.is_confirmed(), message.server_time.is_some());
        }
    }

    /// Property: confirmed records first by server time, then the rest by client time
    #[test]
    fn list_is_render_ordered(updates in prop::collection::vec(arb_update(), 1..60)) {
        let mut store = MessageStore::new();
        for update in updates {
            let _ = store.upsert(update);
        }

        let list = store.list();
        let split = list.iter().position(|m| !m.is_confirmed()).unwrap_or(list.len());
        let (confirmed, tail) = list.split_at(split);

        prop_assert!(tail.iter().all(|m| !m.is_confirmed()));
        prop_assert!(confirmed.windows(2).all(|w| w[0].server_time <= w[1].server_time));
        prop_assert!(tail.windows(2).all(|w| w[0].client_time <= w[1].client_time));
    }

    /// Property: an echo without a server time never moves a confirmed record
    #[test]
    fn untimed_echo_keeps_server_time(
        setup in prop::collection::vec(arb_update(), 1..40),
        key in arb_key(),
        received_at in arb_time(),
    ) {
        let mut store = MessageStore::new();
        for u in setup {
            let _ = store.upsert(u);
        }
        let before = store.get(&key).and_then(|m| m.server_time);

        let echo = MessageUpdate::for_key(key.clone())
            .with_delivery(Delivery::Echoed { received_at });
        let _ = store.upsert(echo);

        if before.is_some() {
            prop_assert_eq!(store.get(&key).and_then(|m| m.server_time), before);
        }
    }

    /// Property: applying the same update twice changes nothing the second time
    #[test]
    fn upsert_is_idempotent(
        setup in prop::collection::vec(arb_update(), 0..20),
        update in arb_update(),
    ) {
        let mut store = MessageStore::new();
        for u in setup {
            let _ = store.upsert(u);
        }

        if store.upsert(update.clone()).is_ok() {
            let before = store.list();
            let second = store.upsert(update).expect("repeat of an accepted update");
            prop_assert!(matches!(second, UpsertOutcome::Unchanged(_)));
            prop_assert_eq!(before, store.list());
        }
    }
}

#[test]
fn test_self_echo_merges_into_pending_record() {
    let mut store = MessageStore::new();
    let key = CorrelationKey::new("mine");
    store
        .upsert(MessageUpdate::local_pending(
            key.clone(),
            DeviceId::new("me"),
            "hello".to_string(),
            Timestamp::new(10),
        ))
        .unwrap();

    let echo = MessageUpdate::confirmed(
        key.clone(),
        DeviceId::new("me"),
        "hello".to_string(),
        Timestamp::new(20),
        Origin::Local,
    );
    assert_eq!(store.upsert(echo).unwrap(), UpsertOutcome::Merged(key.clone()));

    let list = store.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].delivery_state, DeliveryState::Confirmed);
    assert_eq!(list[0].server_time, Some(Timestamp::new(20)));
}
