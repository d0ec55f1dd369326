//! [`tower_sessions`] support for [`SqlSessionStore`].
//!
//! A tower-sessions [`Record`] is stored as an ordinary session payload: its
//! expiry date becomes `cookie.expires` (with the matching `cookie.maxAge`)
//! and its data map is nested under the `data` key. Rows written this way
//! share the table and the sweeper with every other session.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use time::OffsetDateTime;
use tower_sessions::{session::Id, session::Record, session_store, ExpiredDeletion, SessionStore};

use crate::backend::SessionBackend;
use crate::session::SessionData;
use crate::store::SqlSessionStore;

const RECORD_DATA_KEY: &str = "data";

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        // Session ID collision mitigation
        while self.contains(&record.id.to_string()).await? {
            record.id = Id::default();
        }

        self.save(record).await
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        let session = record_to_session(record, Utc::now())?;
        self.set(&record.id.to_string(), &session).await?;
        Ok(())
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        match self.get(&session_id.to_string()).await? {
            Some(session) => session_to_record(*session_id, session).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.destroy(&session_id.to_string()).await?;
        Ok(())
    }
}

#[async_trait]
impl ExpiredDeletion for SqlSessionStore {
    async fn delete_expired(&self) -> session_store::Result<()> {
        self.delete_expired_sessions().await?;
        Ok(())
    }
}

fn record_to_session(record: &Record, now: DateTime<Utc>) -> session_store::Result<SessionData> {
    let expires = convert_time_to_datetime(record.expiry_date)?;
    let data = serde_json::to_value(&record.data)
        .map_err(|e| session_store::Error::Encode(e.to_string()))?;

    Ok(SessionData::with_max_age((expires - now).num_milliseconds())
        .expires(expires)
        .with(RECORD_DATA_KEY, data))
}

fn session_to_record(id: Id, session: SessionData) -> session_store::Result<Record> {
    let data = match session.data.get(RECORD_DATA_KEY) {
        Some(value) => serde_json::from_value::<HashMap<String, serde_json::Value>>(value.clone())
            .map_err(|e| session_store::Error::Decode(e.to_string()))?,
        None => HashMap::new(),
    };

    // Sessions written by other clients may carry only maxAge.
    let expires = session
        .cookie
        .expires
        .unwrap_or_else(|| session.expires_at(Utc::now()));

    Ok(Record {
        id,
        data,
        expiry_date: convert_datetime_to_time(expires)?,
    })
}

fn convert_time_to_datetime(time: OffsetDateTime) -> session_store::Result<DateTime<Utc>> {
    DateTime::from_timestamp(time.unix_timestamp(), time.nanosecond())
        .ok_or_else(|| session_store::Error::Encode(format!("expiry date {time} is out of range")))
}

fn convert_datetime_to_time(datetime: DateTime<Utc>) -> session_store::Result<OffsetDateTime> {
    let nanos = i128::from(datetime.timestamp()) * 1_000_000_000
        + i128::from(datetime.timestamp_subsec_nanos());
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|e| session_store::Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn record() -> Record {
        Record {
            id: Id::default(),
            data: HashMap::from([("user".to_string(), json!("alice"))]),
            expiry_date: OffsetDateTime::from_unix_timestamp(1_900_000_000).unwrap(),
        }
    }

    #[test]
    fn record_becomes_session_with_cookie_fields() {
        let now = Utc.timestamp_opt(1_899_999_000, 0).unwrap();
        let session = record_to_session(&record(), now).unwrap();

        assert_eq!(session.cookie.max_age, Some(1_000_000));
        assert_eq!(
            session.cookie.expires,
            Some(Utc.timestamp_opt(1_900_000_000, 0).unwrap())
        );
        assert_eq!(session.get::<serde_json::Value>("data"), Some(json!({"user": "alice"})));
    }

    #[test]
    fn session_becomes_record_again() {
        let original = record();
        let session = record_to_session(&original, Utc::now()).unwrap();
        let restored = session_to_record(original.id, session).unwrap();

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.data, original.data);
        assert_eq!(restored.expiry_date, original.expiry_date);
    }

    #[test]
    fn foreign_session_without_data_key_loads_empty() {
        let session = SessionData::with_max_age(60_000).with("name", "sample");
        let restored = session_to_record(Id::default(), session).unwrap();

        assert!(restored.data.is_empty());
        assert!(restored.expiry_date > OffsetDateTime::now_utc());
    }

    #[test]
    fn time_conversion_keeps_nanoseconds() {
        let time = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();
        let datetime = convert_time_to_datetime(time).unwrap();
        assert_eq!(datetime.timestamp_subsec_nanos(), 123_456_789);
        assert_eq!(convert_datetime_to_time(datetime).unwrap(), time);
    }
}
