//! Merge policy for records that share a correlation key
//!
//! Pure functions only; the store decides when to call them. The rules:
//!
//! * `text`, `device_id` and `client_time` are fixed once a record exists.
//! * `server_id` and `origin` take the incoming value when it is present.
//! * delivery only moves forward: `Pending` may become `Confirmed` or
//!   `Failed`, both of which are terminal. A confirmation carries the server
//!   time; a record that is not confirmed never carries one.
//! * a live echo without a backend time only fills in a missing server time.

use crate::errors::StoreError;
use crate::protocol::message::{Delivery, DeliveryState, Message, MessageUpdate, Origin};

/// Outcome of merging one update into an existing record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub message: Message,
    /// The update asked for a delivery state the record may not move to
    pub regression_blocked: bool,
}

/// Merge `update` into `existing`
pub fn reconcile(existing: &Message, update: &MessageUpdate) -> Reconciled {
    let mut merged = existing.clone();
    let mut regression_blocked = false;

    if let Some(server_id) = &update.server_id {
        merged.server_id = Some(server_id.clone());
    }
    if let Some(origin) = update.origin {
        merged.origin = origin;
    }

    if let Some(delivery) = update.delivery {
        let next = delivery.state();
        if existing.delivery_state.can_transition_to(next) {
            merged.delivery_state = next;
            merged.server_time = match delivery {
                Delivery::Confirmed { server_time } => Some(server_time),
                Delivery::Echoed { received_at } => existing.server_time.or(Some(received_at)),
                Delivery::Pending | Delivery::Failed => None,
            };
        } else {
            regression_blocked = true;
        }
    }

    if merged.delivery_state != DeliveryState::Confirmed {
        merged.server_time = None;
    }

    Reconciled {
        message: merged,
        regression_blocked,
    }
}

/// Build a new record from an update for an unseen key
///
/// Device id and text are required. A missing delivery means `Pending`, a
/// missing origin means `Remote`, and a missing client time falls back to the
/// confirmation time.
pub fn materialize(update: MessageUpdate) -> Result<Message, StoreError> {
    let key = update.correlation_key.as_str().to_string();
    let device_id = update.device_id.ok_or_else(|| StoreError::IncompleteRecord {
        correlation_key: key.clone(),
        missing: "device_id",
    })?;
    let text = update.text.ok_or_else(|| StoreError::IncompleteRecord {
        correlation_key: key.clone(),
        missing: "text",
    })?;

    let delivery = update.delivery.unwrap_or(Delivery::Pending);
    let server_time = match delivery {
        Delivery::Confirmed { server_time } => Some(server_time),
        Delivery::Echoed { received_at } => Some(received_at),
        Delivery::Pending | Delivery::Failed => None,
    };
    let client_time = update
        .client_time
        .or(server_time)
        .ok_or(StoreError::IncompleteRecord {
            correlation_key: key,
            missing: "client_time",
        })?;

    Ok(Message {
        correlation_key: update.correlation_key,
        server_id: update.server_id,
        device_id,
        text,
        client_time,
        server_time,
        delivery_state: delivery.state(),
        origin: update.origin.unwrap_or(Origin::Remote),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrelationKey, DeviceId, ServerId, Timestamp};

    fn pending() -> Message {
        materialize(MessageUpdate::local_pending(
            CorrelationKey::new("k"),
            DeviceId::new("me"),
            "hello".to_string(),
            Timestamp::new(100),
        ))
        .unwrap()
    }

    #[test]
    fn test_confirmation_backfills_server_fields() {
        let update = MessageUpdate::confirmation(CorrelationKey::new("k"), Timestamp::new(150))
            .with_server_id(Some(ServerId::new("7")));
        let result = reconcile(&pending(), &update);

        assert!(!result.regression_blocked);
        assert_eq!(result.message.delivery_state, DeliveryState::Confirmed);
        assert_eq!(result.message.server_time, Some(Timestamp::new(150)));
        assert_eq!(result.message.server_id, Some(ServerId::new("7")));
        assert_eq!(result.message.client_time, Timestamp::new(100));
    }

    #[test]
    fn test_confirmed_never_regresses() {
        let confirmed = reconcile(
            &pending(),
            &MessageUpdate::confirmation(CorrelationKey::new("k"), Timestamp::new(150)),
        )
        .message;

        let back_to_pending =
            MessageUpdate::for_key(CorrelationKey::new("k")).with_delivery(Delivery::Pending);
        let result = reconcile(&confirmed, &back_to_pending);
        assert!(result.regression_blocked);
        assert_eq!(result.message, confirmed);

        let result = reconcile(&confirmed, &MessageUpdate::failure(CorrelationKey::new("k")));
        assert!(result.regression_blocked);
        assert!(result.message.is_confirmed());
    }

    #[test]
    fn test_text_and_author_are_immutable() {
        let mut update = MessageUpdate::confirmed(
            CorrelationKey::new("k"),
            DeviceId::new("someone-else"),
            "rewritten".to_string(),
            Timestamp::new(150),
            Origin::Remote,
        );
        update.client_time = Some(Timestamp::new(1));
        let result = reconcile(&pending(), &update).message;

        assert_eq!(result.text, "hello");
        assert_eq!(result.device_id, DeviceId::new("me"));
        assert_eq!(result.client_time, Timestamp::new(100));
        assert_eq!(result.origin, Origin::Remote);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let update = MessageUpdate::confirmation(CorrelationKey::new("k"), Timestamp::new(150));
        let once = reconcile(&pending(), &update).message;
        let twice = reconcile(&once, &update).message;
        assert_eq!(once, twice);
    }

    #[test]
    fn test_echo_without_server_time_keeps_confirmed_time() {
        let confirmed = reconcile(
            &pending(),
            &MessageUpdate::confirmation(CorrelationKey::new("k"), Timestamp::new(150)),
        )
        .message;

        let echo = MessageUpdate::for_key(CorrelationKey::new("k")).with_delivery(Delivery::Echoed {
            received_at: Timestamp::new(9_999),
        });
        let result = reconcile(&confirmed, &echo);
        assert!(!result.regression_blocked);
        assert_eq!(result.message.server_time, Some(Timestamp::new(150)));
    }

    #[test]
    fn test_echo_confirms_pending_with_receipt_time() {
        let echo = MessageUpdate::for_key(CorrelationKey::new("k")).with_delivery(Delivery::Echoed {
            received_at: Timestamp::new(120),
        });
        let echoed = reconcile(&pending(), &echo).message;
        assert!(echoed.is_confirmed());
        assert_eq!(echoed.server_time, Some(Timestamp::new(120)));

        // The backend's own time still lands afterwards
        let persisted = reconcile(
            &echoed,
            &MessageUpdate::confirmation(CorrelationKey::new("k"), Timestamp::new(150)),
        )
        .message;
        assert_eq!(persisted.server_time, Some(Timestamp::new(150)));
    }

    #[test]
    fn test_materialize_requires_text() {
        let mut update = MessageUpdate::for_key(CorrelationKey::new("k"));
        update.device_id = Some(DeviceId::new("me"));
        let err = materialize(update).unwrap_err();
        assert!(matches!(err, StoreError::IncompleteRecord { missing: "text", .. }));
    }
}
