//! JSON wire formats for the three external collaborators
//!
//! Field names follow the backend's camelCase convention. Timestamps are
//! milliseconds since the Unix epoch; server ids may be strings or numbers.

use serde::{Deserialize, Deserializer, Serialize};

use crate::protocol::message::{Delivery, MessageUpdate, Origin};
use crate::types::{CorrelationKey, DeviceId, ServerId, Timestamp};
use crate::Result;

// ----------------------------------------------------------------------------
// History Service / Persistence Endpoint
// ----------------------------------------------------------------------------

/// One persisted message as returned by the History Service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub device_id: DeviceId,
    pub text: String,
    #[serde(deserialize_with = "deserialize_millis")]
    pub created_at: Timestamp,
    pub server_id: ServerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<CorrelationKey>,
}

/// The Persistence Endpoint answers with the stored record
pub type PersistedRecord = HistoryRecord;

impl HistoryRecord {
    /// Decode a History Service response body
    pub fn decode_list(body: &str) -> Result<Vec<HistoryRecord>> {
        Ok(serde_json::from_str(body)?)
    }

    /// Confirmed store update for this record
    ///
    /// Records without a correlation key are keyed by their server id.
    pub fn into_update(self, local_device: &DeviceId) -> MessageUpdate {
        let key = self
            .correlation_key
            .unwrap_or_else(|| CorrelationKey::derived(Some(&self.server_id)));
        let origin = origin_of(&self.device_id, local_device);
        MessageUpdate::confirmed(key, self.device_id, self.text, self.created_at, origin)
            .with_server_id(Some(self.server_id))
    }
}

/// Body of a Persistence Endpoint request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistRequest {
    pub device_id: DeviceId,
    pub text: String,
    pub correlation_key: CorrelationKey,
}

// ----------------------------------------------------------------------------
// Live Channel
// ----------------------------------------------------------------------------

/// Text frame exchanged over the live channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePayload {
    pub device_id: DeviceId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<CorrelationKey>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub server_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
}

impl LivePayload {
    /// Outbound frame for a message composed on this device
    pub fn outbound(device_id: DeviceId, text: String, correlation_key: CorrelationKey) -> Self {
        Self {
            device_id,
            message: text,
            correlation_key: Some(correlation_key),
            server_time: None,
            server_id: None,
        }
    }

    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Confirmed store update for an inbound payload
    ///
    /// A payload without a server time is an echo stamped with `received_at`,
    /// which only counts when the record has no server time yet. One without
    /// a correlation key gets a freshly derived key.
    pub fn into_update(self, local_device: &DeviceId, received_at: Timestamp) -> MessageUpdate {
        let key = self
            .correlation_key
            .unwrap_or_else(|| CorrelationKey::derived(self.server_id.as_ref()));
        let origin = origin_of(&self.device_id, local_device);
        let update = MessageUpdate::confirmed(
            key,
            self.device_id,
            self.message,
            self.server_time.unwrap_or(received_at),
            origin,
        )
        .with_server_id(self.server_id);
        match self.server_time {
            Some(_) => update,
            None => update.with_delivery(Delivery::Echoed { received_at }),
        }
    }
}

fn origin_of(author: &DeviceId, local_device: &DeviceId) -> Origin {
    if author == local_device {
        Origin::Local
    } else {
        Origin::Remote
    }
}

// ----------------------------------------------------------------------------
// Timestamp decoding
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMillis {
    Integer(u64),
    Float(f64),
    Text(String),
}

impl RawMillis {
    fn into_timestamp<E: serde::de::Error>(self) -> core::result::Result<Timestamp, E> {
        match self {
            RawMillis::Integer(ms) => Ok(Timestamp::new(ms)),
            RawMillis::Float(ms) if ms.is_finite() && ms >= 0.0 => Ok(Timestamp::new(ms as u64)),
            RawMillis::Float(ms) => Err(E::custom(format!("invalid timestamp {}", ms))),
            RawMillis::Text(s) => s
                .trim()
                .parse::<u64>()
                .map(Timestamp::new)
                .map_err(|_| E::custom(format!("invalid timestamp {:?}", s))),
        }
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> core::result::Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    RawMillis::deserialize(deserializer)?.into_timestamp()
}

fn deserialize_optional_millis<'de, D>(
    deserializer: D,
) -> core::result::Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawMillis>::deserialize(deserializer)?
        .map(RawMillis::into_timestamp)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_history_with_numeric_ids() {
        let body = r#"[
            {"deviceId":"a","text":"hi","createdAt":1000,"serverId":17},
            {"deviceId":"b","text":"yo","createdAt":"1001","serverId":"18","correlationKey":"k2"}
        ]"#;
        let records = HistoryRecord::decode_list(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].server_id.as_str(), "17");
        assert_eq!(records[1].created_at, Timestamp::new(1001));
        assert_eq!(records[1].correlation_key, Some(CorrelationKey::new("k2")));
    }

    #[test]
    fn test_history_record_origin_and_key() {
        let record = HistoryRecord {
            device_id: DeviceId::new("me"),
            text: "hi".to_string(),
            created_at: Timestamp::new(5),
            server_id: ServerId::new("3"),
            correlation_key: None,
        };
        let update = record.into_update(&DeviceId::new("me"));
        assert_eq!(update.origin, Some(Origin::Local));
        assert_eq!(update.correlation_key.as_str(), "srv:3");
        assert_eq!(
            update.delivery,
            Some(Delivery::Confirmed {
                server_time: Timestamp::new(5)
            })
        );
    }

    #[test]
    fn test_outbound_payload_omits_server_fields() {
        let payload = LivePayload::outbound(
            DeviceId::new("me"),
            "hello".to_string(),
            CorrelationKey::new("k1"),
        );
        let json = payload.encode().unwrap();
        assert_eq!(
            json,
            r#"{"deviceId":"me","message":"hello","correlationKey":"k1"}"#
        );
    }

    #[test]
    fn test_live_payload_without_server_time_uses_receipt_time() {
        let payload = LivePayload::decode(r#"{"deviceId":"x","message":"m"}"#).unwrap();
        let update = payload.into_update(&DeviceId::new("me"), Timestamp::new(77));
        assert_eq!(update.origin, Some(Origin::Remote));
        assert!(update.correlation_key.is_derived());
        assert_eq!(update.client_time, Some(Timestamp::new(77)));
        assert_eq!(
            update.delivery,
            Some(Delivery::Echoed {
                received_at: Timestamp::new(77)
            })
        );

        let timed = LivePayload::decode(r#"{"deviceId":"x","message":"m","serverTime":5}"#)
            .unwrap()
            .into_update(&DeviceId::new("me"), Timestamp::new(77));
        assert_eq!(
            timed.delivery,
            Some(Delivery::Confirmed {
                server_time: Timestamp::new(5)
            })
        );
    }

    #[test]
    fn test_undecodable_frame_is_an_error() {
        assert!(LivePayload::decode("not json").is_err());
        assert!(LivePayload::decode(r#"{"message":"no author"}"#).is_err());
    }
}
