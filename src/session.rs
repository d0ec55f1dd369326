//! Session payload types.
//!
//! The JSON layout matches what connect-style session middleware writes: a
//! `cookie` object carrying `maxAge` (milliseconds) and/or `expires`, with the
//! application's own keys stored next to it at the top level.

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Lifetime (in milliseconds) given to sessions whose cookie carries no `maxAge`.
pub const DEFAULT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Cookie metadata stored alongside the session data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    /// Remaining lifetime in milliseconds.
    #[serde(rename = "maxAge", default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,

    /// Absolute expiration time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    /// Any other cookie attributes (`path`, `httpOnly`, `originalMaxAge`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A session payload as persisted in the `sess` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub cookie: SessionCookie,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session whose cookie lives for `max_age_ms` milliseconds.
    pub fn with_max_age(max_age_ms: i64) -> Self {
        Self {
            cookie: SessionCookie {
                max_age: Some(max_age_ms),
                ..SessionCookie::default()
            },
            data: Map::new(),
        }
    }

    /// Sets the cookie's absolute expiration time.
    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.cookie.expires = Some(at);
        self
    }

    /// Deserializes the value stored under `key`, if present and well-typed.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Builder form of [`SessionData::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// The row expiry this payload implies when written at `now`.
    ///
    /// `now + cookie.maxAge` when `maxAge` is present, otherwise
    /// `now + DEFAULT_TTL_MS`. Saturates instead of overflowing.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = match self.cookie.max_age {
            Some(ms) => TimeDelta::try_milliseconds(ms).unwrap_or(if ms < 0 {
                TimeDelta::MIN
            } else {
                TimeDelta::MAX
            }),
            None => TimeDelta::milliseconds(DEFAULT_TTL_MS),
        };
        now.checked_add_signed(ttl).unwrap_or(if ttl < TimeDelta::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
    }

    /// Serializes the payload to the JSON text bound for the `sess` column.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(StoreError::Encode)
    }
}

/// The raw contents of a `sess` column.
///
/// Dialects with a JSON column type hand back structured JSON; the rest hand
/// back text that still needs parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredPayload {
    Text(String),
    Json(Value),
}

impl StoredPayload {
    /// Decodes the stored value into a [`SessionData`].
    ///
    /// A JSON string value is treated as doubly encoded and parsed again.
    pub fn decode(self) -> Result<SessionData> {
        match self {
            StoredPayload::Text(text) | StoredPayload::Json(Value::String(text)) => {
                serde_json::from_str(&text).map_err(StoreError::MalformedPayload)
            }
            StoredPayload::Json(value) => {
                serde_json::from_value(value).map_err(StoreError::MalformedPayload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn expiry_from_max_age() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let session = SessionData::with_max_age(20_000);
        assert_eq!(session.expires_at(now), now + TimeDelta::seconds(20));

        let expired = SessionData::with_max_age(-1_000);
        assert!(expired.expires_at(now) < now);
    }

    #[test]
    fn expiry_defaults_to_one_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(SessionData::new().expires_at(now), now + TimeDelta::hours(24));
    }

    #[test]
    fn expiry_saturates() {
        let now = Utc::now();
        assert_eq!(SessionData::with_max_age(i64::MAX).expires_at(now), DateTime::<Utc>::MAX_UTC);
        assert_eq!(SessionData::with_max_age(i64::MIN).expires_at(now), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn json_layout_matches_connect_sessions() {
        let session = SessionData::with_max_age(20_000).with("name", "sample");
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value, json!({"cookie": {"maxAge": 20000}, "name": "sample"}));
    }

    #[test]
    fn keeps_unknown_cookie_attributes() {
        let raw = json!({
            "cookie": {"originalMaxAge": 1000, "httpOnly": true, "path": "/", "expires": "2030-01-01T00:00:00.000Z"},
            "views": 3
        });
        let session: SessionData = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(session.cookie.max_age, None);
        assert_eq!(session.cookie.extra.get("path"), Some(&json!("/")));
        assert_eq!(session.get::<u32>("views"), Some(3));

        let again = serde_json::to_value(&session).unwrap();
        assert_eq!(again["cookie"]["httpOnly"], json!(true));
        assert_eq!(again["views"], json!(3));
    }

    #[test]
    fn decodes_text_and_json_payloads() {
        let expected = SessionData::with_max_age(1000).with("name", "n");
        let text = StoredPayload::Text(expected.encode().unwrap());
        assert_eq!(text.decode().unwrap(), expected);

        let native = StoredPayload::Json(serde_json::to_value(&expected).unwrap());
        assert_eq!(native.decode().unwrap(), expected);

        let doubly = StoredPayload::Json(Value::String(expected.encode().unwrap()));
        assert_eq!(doubly.decode().unwrap(), expected);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = StoredPayload::Text("{not json".into()).decode().unwrap_err();
        assert!(matches!(err, StoreError::MalformedPayload(_)));

        let err = StoredPayload::Json(json!({"cookie": "nope"})).decode().unwrap_err();
        assert!(matches!(err, StoreError::MalformedPayload(_)));
    }
}
