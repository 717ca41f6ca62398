//! Base station telemetry record and the shared store that holds the latest reading.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

/// The last reading received from the base station.
///
/// Every field is carried as a string on the wire. Interpretation as a number
/// happens at scrape time, see [`crate::coerce`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: String,
    pub timestamp: String,
    pub uptime: String,
    pub uplink: String,
    pub downlink: String,
    pub limit_connection: String,
    pub main_power: String,
    pub battery: String,
}

impl TelemetryRecord {
    /// Get the raw string value of a field.
    pub fn get(&self, field: TelemetryField) -> &str {
        match field {
            TelemetryField::Id => &self.id,
            TelemetryField::Timestamp => &self.timestamp,
            TelemetryField::Uptime => &self.uptime,
            TelemetryField::Uplink => &self.uplink,
            TelemetryField::Downlink => &self.downlink,
            TelemetryField::Battery => &self.battery,
            TelemetryField::LimitConnection => &self.limit_connection,
            TelemetryField::MainPower => &self.main_power,
        }
    }

    /// Merge the fields present in `update` into this record.
    pub fn merge(&mut self, update: TelemetryUpdate) {
        let TelemetryUpdate {
            id,
            timestamp,
            uptime,
            uplink,
            downlink,
            limit_connection,
            main_power,
            battery,
        } = update;

        let slots = [
            (&mut self.id, id),
            (&mut self.timestamp, timestamp),
            (&mut self.uptime, uptime),
            (&mut self.uplink, uplink),
            (&mut self.downlink, downlink),
            (&mut self.limit_connection, limit_connection),
            (&mut self.main_power, main_power),
            (&mut self.battery, battery),
        ];

        for (slot, value) in slots {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

/// A telemetry document as sent by the device.
///
/// Absent (or `null`) fields leave the stored value untouched. Any other
/// non-string value makes the whole document fail to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TelemetryUpdate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub uptime: Option<String>,
    #[serde(default)]
    pub uplink: Option<String>,
    #[serde(default)]
    pub downlink: Option<String>,
    #[serde(default)]
    pub limit_connection: Option<String>,
    #[serde(default)]
    pub main_power: Option<String>,
    #[serde(default)]
    pub battery: Option<String>,
}

impl TelemetryUpdate {
    /// Number of fields carried by this update.
    pub fn field_count(&self) -> usize {
        [
            &self.id,
            &self.timestamp,
            &self.uptime,
            &self.uplink,
            &self.downlink,
            &self.limit_connection,
            &self.main_power,
            &self.battery,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
    }
}

/// The telemetry fields exported as gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryField {
    Id,
    Timestamp,
    Uptime,
    Uplink,
    Downlink,
    Battery,
    LimitConnection,
    MainPower,
}

impl TelemetryField {
    /// All fields, in exposition order.
    pub const ALL: [TelemetryField; 8] = [
        TelemetryField::Id,
        TelemetryField::Timestamp,
        TelemetryField::Uptime,
        TelemetryField::Uplink,
        TelemetryField::Downlink,
        TelemetryField::Battery,
        TelemetryField::LimitConnection,
        TelemetryField::MainPower,
    ];

    /// JSON key, also used as the metric name suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryField::Id => "id",
            TelemetryField::Timestamp => "timestamp",
            TelemetryField::Uptime => "uptime",
            TelemetryField::Uplink => "uplink",
            TelemetryField::Downlink => "downlink",
            TelemetryField::Battery => "battery",
            TelemetryField::LimitConnection => "limit_connection",
            TelemetryField::MainPower => "main_power",
        }
    }

    /// HELP text for the exported gauge.
    pub fn help(&self) -> &'static str {
        match self {
            TelemetryField::Id => "Current id",
            TelemetryField::Timestamp => "Timestamp",
            TelemetryField::Uptime => "uptime",
            TelemetryField::Uplink => "uplink",
            TelemetryField::Downlink => "downlink",
            TelemetryField::Battery => "battery level",
            TelemetryField::LimitConnection => "Connection is limited",
            TelemetryField::MainPower => "Battery or 220V",
        }
    }
}

impl std::fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thread-safe holder of the latest telemetry record.
///
/// Writers replace or merge under the write lock, readers clone a snapshot
/// under the read lock, so a scrape never observes a half-applied update.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    record: RwLock<TelemetryRecord>,
    updates_applied: RwLock<u64>,
}

/// Create a shareable store handle.
pub type SharedStore = Arc<TelemetryStore>;

impl TelemetryStore {
    /// Create an empty store (all fields zero-valued).
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current record.
    pub fn read(&self) -> TelemetryRecord {
        self.record.read().clone()
    }

    /// Replace the whole record.
    pub fn write(&self, record: TelemetryRecord) {
        *self.record.write() = record;
        *self.updates_applied.write() += 1;
    }

    /// Merge a partial update into the stored record.
    pub fn apply(&self, update: TelemetryUpdate) {
        self.record.write().merge(update);
        *self.updates_applied.write() += 1;
    }

    /// Number of writes (full or partial) applied since start.
    pub fn updates_applied(&self) -> u64 {
        *self.updates_applied.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> TelemetryRecord {
        TelemetryRecord {
            id: "AA".to_string(),
            timestamp: "1700000000".to_string(),
            uptime: "3600".to_string(),
            uplink: "12.5".to_string(),
            downlink: "40".to_string(),
            limit_connection: "0".to_string(),
            main_power: "1".to_string(),
            battery: "98".to_string(),
        }
    }

    #[test]
    fn test_default_record_is_empty() {
        let record = TelemetryRecord::default();
        for field in TelemetryField::ALL {
            assert_eq!(record.get(field), "");
        }
    }

    #[test]
    fn test_decode_full_update() {
        let json = r#"{"id":"AA","timestamp":"1","uptime":"2","uplink":"3",
            "downlink":"4","limit_connection":"0","main_power":"1","battery":"73.5"}"#;
        let update: TelemetryUpdate = serde_json::from_str(json).unwrap();

        assert_eq!(update.field_count(), 8);
        assert_eq!(update.battery.as_deref(), Some("73.5"));
    }

    #[test]
    fn test_decode_ignores_unknown_keys() {
        let update: TelemetryUpdate =
            serde_json::from_str(r#"{"battery":"50","firmware":"v2"}"#).unwrap();

        assert_eq!(update.field_count(), 1);
    }

    #[test]
    fn test_decode_null_leaves_field_absent() {
        let update: TelemetryUpdate =
            serde_json::from_str(r#"{"battery":null,"id":"1"}"#).unwrap();

        assert_eq!(update.battery, None);
        assert_eq!(update.id.as_deref(), Some("1"));
    }

    #[test]
    fn test_decode_rejects_non_string_values() {
        assert!(serde_json::from_str::<TelemetryUpdate>(r#"{"battery":50}"#).is_err());
        assert!(serde_json::from_str::<TelemetryUpdate>(r#"{"id":true}"#).is_err());
        assert!(serde_json::from_str::<TelemetryUpdate>(r#"["id"]"#).is_err());
    }

    #[test]
    fn test_merge_partial_update() {
        let mut record = full_record();
        record.merge(TelemetryUpdate {
            battery: Some("50".to_string()),
            ..Default::default()
        });

        let expected = TelemetryRecord {
            battery: "50".to_string(),
            ..full_record()
        };
        assert_eq!(record, expected);
    }

    #[test]
    fn test_store_apply_and_read() {
        let store = TelemetryStore::new();
        assert_eq!(store.updates_applied(), 0);

        store.write(full_record());
        store.apply(TelemetryUpdate {
            uplink: Some("99".to_string()),
            ..Default::default()
        });

        let snapshot = store.read();
        assert_eq!(snapshot.uplink, "99");
        assert_eq!(snapshot.id, "AA");
        assert_eq!(store.updates_applied(), 2);
    }

    #[test]
    fn test_field_names_are_unique() {
        let mut names: Vec<_> = TelemetryField::ALL.iter().map(|f| f.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TelemetryField::ALL.len());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(TelemetryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let value = i.to_string();
                        store.write(TelemetryRecord {
                            id: value.clone(),
                            battery: value,
                            ..Default::default()
                        });
                        // A snapshot always comes from a single write.
                        let snapshot = store.read();
                        assert_eq!(snapshot.id, snapshot.battery);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.updates_applied(), 800);
    }
}
