//! Deterministic engine scenarios
//!
//! Drives `SyncEngine` through the event sequences the runtime produces,
//! using a mock clock, and checks the resulting timeline.

use roomsync_core::{
    AppEvent, AuditEntry, ConnectionStatus, CorrelationKey, DeliveryState, DeviceId, Effect,
    Event, HistoryRecord, HistoryStatus, LivePayload, MockTimeSource, Origin, ServerId,
    SyncEngine, Timestamp,
};

fn new_engine() -> (SyncEngine<MockTimeSource>, MockTimeSource) {
    let time = MockTimeSource::new_at(1_000);
    (SyncEngine::new(DeviceId::new("me"), time.clone()), time)
}

fn transition(status: ConnectionStatus) -> Event {
    Event::ChannelTransition {
        status,
        audit_entry: AuditEntry {
            timestamp: Timestamp::new(0),
            from_state: "Test".to_string(),
            to_state: format!("{:?}", status),
            event: "Test".to_string(),
            effects_count: 0,
        },
    }
}

fn echo(device: &str, text: &str, key: Option<&CorrelationKey>, at: u64, id: &str) -> Event {
    Event::LivePayloadReceived {
        payload: LivePayload {
            device_id: DeviceId::new(device),
            message: text.to_string(),
            correlation_key: key.cloned(),
            server_time: Some(Timestamp::new(at)),
            server_id: Some(ServerId::new(id)),
        },
    }
}

fn persisted(key: &CorrelationKey, text: &str, at: u64, id: &str) -> Event {
    Event::PersistConfirmed {
        key: key.clone(),
        record: HistoryRecord {
            device_id: DeviceId::new("me"),
            text: text.to_string(),
            created_at: Timestamp::new(at),
            server_id: ServerId::new(id),
            correlation_key: Some(key.clone()),
        },
    }
}

#[test]
fn test_compose_history_persist_echo_keeps_one_record() {
    let (mut engine, _) = new_engine();

    let (key, _) = engine.compose("hello");
    let key = key.expect("non-blank text is composed");
    let list = engine.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].delivery_state, DeliveryState::Pending);

    engine.request_history();
    engine.handle_event(Event::HistoryLoaded {
        records: Vec::new(),
    });
    assert_eq!(engine.list().len(), 1);
    assert_eq!(engine.history_status(), &HistoryStatus::Loaded { count: 0 });

    let step = engine.handle_event(persisted(&key, "hello", 1_010, "501"));
    assert_eq!(
        step.app_events,
        vec![AppEvent::DeliveryChanged {
            key: key.clone(),
            state: DeliveryState::Confirmed
        }]
    );
    let list = engine.list();
    assert_eq!(list[0].delivery_state, DeliveryState::Confirmed);
    assert_eq!(list[0].server_time, Some(Timestamp::new(1_010)));
    assert_eq!(list[0].server_id, Some(ServerId::new("501")));

    let step = engine.handle_event(echo("me", "hello", Some(&key), 1_010, "501"));
    assert!(step.app_events.is_empty());
    let list = engine.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].origin, Origin::Local);
}

#[test]
fn test_echo_before_persist_response_confirms_once() {
    let (mut engine, _) = new_engine();
    let (key, _) = engine.compose("first");
    let key = key.unwrap();

    engine.handle_event(echo("me", "first", Some(&key), 1_005, "9"));
    engine.handle_event(persisted(&key, "first", 1_005, "9"));

    let list = engine.list();
    assert_eq!(list.len(), 1);
    assert!(list[0].is_confirmed());
    assert_eq!(engine.store().stats().duplicates_suppressed, 1);
}

#[test]
fn test_out_of_order_live_payloads_render_by_server_time() {
    let (mut engine, _) = new_engine();

    engine.handle_event(echo("bob", "second", None, 2_000, "2"));
    engine.handle_event(echo("alice", "first", None, 1_500, "1"));

    let texts: Vec<String> = engine.list().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[test]
fn test_history_and_keyless_echo_do_not_duplicate() {
    let (mut engine, _) = new_engine();
    engine.request_history();
    engine.handle_event(Event::HistoryLoaded {
        records: vec![HistoryRecord {
            device_id: DeviceId::new("alice"),
            text: "hi".to_string(),
            created_at: Timestamp::new(500),
            server_id: ServerId::new("77"),
            correlation_key: None,
        }],
    });
    engine.handle_event(echo("alice", "hi", None, 500, "77"));
    assert_eq!(engine.list().len(), 1);
}

#[test]
fn test_history_failure_is_retryable_and_keeps_messages() {
    let (mut engine, _) = new_engine();
    engine.compose("still here");
    engine.request_history();

    let step = engine.handle_event(Event::HistoryFailed {
        reason: "connection refused".to_string(),
    });
    assert!(matches!(
        step.app_events.as_slice(),
        [AppEvent::HistoryFailed { .. }]
    ));
    assert!(engine.history_status().is_retryable());
    assert_eq!(engine.list().len(), 1);

    assert_eq!(engine.request_history().effects, vec![Effect::FetchHistory]);
}

#[test]
fn test_persist_failure_marks_failed_and_drops_queued_frame() {
    let (mut engine, _) = new_engine();
    let (key, _) = engine.compose("doomed");
    let key = key.unwrap();
    assert_eq!(engine.outbox_len(), 1);

    engine.handle_event(Event::PersistFailed {
        key: key.clone(),
        reason: "status 500".to_string(),
    });
    assert_eq!(engine.outbox_len(), 0);
    assert!(engine.store().get(&key).unwrap().is_failed());

    // A reconnect flushes nothing for the failed message
    let step = engine.handle_event(transition(ConnectionStatus::Connected));
    assert!(step.effects.is_empty());
}

#[test]
fn test_retry_failed_composes_under_new_key() {
    let (mut engine, time) = new_engine();
    let (key, _) = engine.compose("again");
    let key = key.unwrap();
    engine.handle_event(Event::PersistFailed {
        key: key.clone(),
        reason: "timeout".to_string(),
    });

    time.advance(100);
    let (retry_key, step) = engine.retry_failed(&key);
    let retry_key = retry_key.expect("failed messages can be retried");
    assert_ne!(retry_key, key);
    assert!(step
        .effects
        .iter()
        .any(|e| matches!(e, Effect::PersistMessage { request } if request.text == "again")));

    let list = engine.list();
    assert_eq!(list.len(), 2);
    assert!(list[0].is_failed());
    assert_eq!(list[1].correlation_key, retry_key);
    assert!(list[1].is_pending());
}

#[test]
fn test_retry_of_non_failed_key_is_a_noop() {
    let (mut engine, _) = new_engine();
    let (key, _) = engine.compose("fine");
    let (retry, step) = engine.retry_failed(&key.unwrap());
    assert!(retry.is_none());
    assert!(step.is_empty());

    let (retry, _) = engine.retry_failed(&CorrelationKey::new("unknown"));
    assert!(retry.is_none());
    assert_eq!(engine.list().len(), 1);
}

#[test]
fn test_outbox_flushes_in_composition_order() {
    let (mut engine, time) = new_engine();
    let mut keys = Vec::new();
    for text in ["one", "two", "three"] {
        keys.push(engine.compose(text).0.unwrap());
        time.advance(10);
    }

    let step = engine.handle_event(transition(ConnectionStatus::Connected));
    let sent: Vec<CorrelationKey> = step
        .effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::SendLive { payload } => payload.correlation_key,
            _ => None,
        })
        .collect();
    assert_eq!(sent, keys);
}

#[test]
fn test_bounced_frame_is_requeued_for_next_connection() {
    let (mut engine, _) = new_engine();
    engine.handle_event(transition(ConnectionStatus::Connected));
    let (key, step) = engine.compose("bounce");
    let key = key.unwrap();

    let payload = step
        .effects
        .into_iter()
        .find_map(|e| match e {
            Effect::SendLive { payload } => Some(payload),
            _ => None,
        })
        .unwrap();

    engine.handle_event(transition(ConnectionStatus::Disconnected));
    engine.handle_event(Event::LiveSendFailed { payload });
    assert_eq!(engine.outbox_len(), 1);

    let step = engine.handle_event(transition(ConnectionStatus::Connected));
    assert!(matches!(
        step.effects.as_slice(),
        [Effect::SendLive { payload }] if payload.correlation_key.as_ref() == Some(&key)
    ));
}

#[test]
fn test_foreign_payload_reusing_local_key_gets_its_own_record() {
    let (mut engine, _) = new_engine();
    let (key, _) = engine.compose("mine");
    let key = key.unwrap();

    engine.handle_event(echo("mallory", "not yours", Some(&key), 1_200, "66"));

    let list = engine.list();
    assert_eq!(list.len(), 2);
    let mine = engine.store().get(&key).unwrap();
    assert!(mine.is_pending());
    assert_eq!(mine.text, "mine");
}

#[test]
fn test_live_payload_without_server_time_uses_receipt_time() {
    let (mut engine, time) = new_engine();
    time.set_time(4_242);
    engine.handle_event(Event::LivePayloadReceived {
        payload: LivePayload {
            device_id: DeviceId::new("bob"),
            message: "untimed".to_string(),
            correlation_key: None,
            server_time: None,
            server_id: None,
        },
    });
    let list = engine.list();
    assert_eq!(list[0].server_time, Some(Timestamp::new(4_242)));
    assert_eq!(list[0].origin, Origin::Remote);
}

#[test]
fn test_untimed_self_echo_keeps_persisted_server_time() {
    let (mut engine, time) = new_engine();
    let (key, _) = engine.compose("mine");
    let key = key.unwrap();

    engine.handle_event(persisted(&key, "mine", 50_000, "1"));
    engine.handle_event(echo("bob", "theirs", None, 50_010, "2"));

    time.set_time(99_999);
    let step = engine.handle_event(Event::LivePayloadReceived {
        payload: LivePayload {
            device_id: DeviceId::new("me"),
            message: "mine".to_string(),
            correlation_key: Some(key.clone()),
            server_time: None,
            server_id: None,
        },
    });
    assert!(step.app_events.is_empty());

    let list = engine.list();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].correlation_key, key);
    assert_eq!(list[0].server_time, Some(Timestamp::new(50_000)));
    assert_eq!(list[1].text, "theirs");
    assert_eq!(list[1].server_time, Some(Timestamp::new(50_010)));
}

#[test]
fn test_busy_connected_channel_sends_requeued_frames_in_order() {
    let (mut engine, time) = new_engine();
    let mut keys = Vec::new();
    for text in ["one", "two", "three"] {
        keys.push(engine.compose(text).0.unwrap());
        time.advance(10);
    }

    // The flush hands over all three; the channel only took the first
    let step = engine.handle_event(transition(ConnectionStatus::Connected));
    let mut flushed = step.effects.into_iter().filter_map(|e| match e {
        Effect::SendLive { payload } => Some(payload),
        _ => None,
    });
    let first = flushed.next().unwrap();
    for payload in flushed {
        engine.handle_event(Event::LiveSendFailed { payload });
    }
    assert_eq!(engine.connection_status(), ConnectionStatus::Connected);
    assert!(engine.has_live_backlog());

    let mut sent = vec![first.correlation_key.unwrap()];
    while let Some(payload) = engine.next_live_frame() {
        sent.push(payload.correlation_key.unwrap());
    }
    assert_eq!(sent, keys);
    assert_eq!(engine.outbox_len(), 0);
}

#[test]
fn test_connection_status_changes_are_reported_once() {
    let (mut engine, _) = new_engine();
    let step = engine.handle_event(transition(ConnectionStatus::Connecting));
    assert_eq!(
        step.app_events,
        vec![AppEvent::ConnectionStatusChanged {
            status: ConnectionStatus::Connecting
        }]
    );
    let step = engine.handle_event(transition(ConnectionStatus::Connecting));
    assert!(step.app_events.is_empty());
    assert_eq!(engine.audit_log().len(), 2);
    assert_eq!(engine.diagnostics().audit.len(), 2);
}
