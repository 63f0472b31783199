use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The outcome of benchmarking one backend.
///
/// Read timings are mean latencies of a single call; the parallel ones are
/// additionally averaged over every reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub backend: String,
    #[serde(with = "secs")]
    pub insert_rows: Duration,
    #[serde(with = "secs")]
    pub retrieve_last_timecode: Duration,
    #[serde(with = "secs")]
    pub retrieve_most_viewed: Duration,
    #[serde(with = "secs")]
    pub retrieve_last_timecode_under_load: Duration,
    #[serde(with = "secs")]
    pub retrieve_most_viewed_under_load: Duration,
    #[serde(with = "secs")]
    pub retrieve_last_timecode_in_parallel: Duration,
    #[serde(with = "secs")]
    pub retrieve_most_viewed_in_parallel: Duration,
}

/// Durations as fractional seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_serialize_as_seconds() {
        let record = ResultRecord {
            backend: "memory".into(),
            insert_rows: Duration::from_millis(1_500),
            retrieve_last_timecode: Duration::from_millis(2),
            retrieve_most_viewed: Duration::from_millis(4),
            retrieve_last_timecode_under_load: Duration::from_millis(3),
            retrieve_most_viewed_under_load: Duration::from_millis(5),
            retrieve_last_timecode_in_parallel: Duration::from_millis(6),
            retrieve_most_viewed_in_parallel: Duration::from_millis(8),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["backend"], "memory");
        assert_eq!(json["insert_rows"], 1.5);
        assert_eq!(json["retrieve_most_viewed_in_parallel"], 0.008);

        let back: ResultRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.insert_rows, record.insert_rows);
    }

    #[test]
    fn negative_seconds_are_rejected() {
        let json = serde_json::json!({
            "backend": "x",
            "insert_rows": -1.0,
            "retrieve_last_timecode": 0.0,
            "retrieve_most_viewed": 0.0,
            "retrieve_last_timecode_under_load": 0.0,
            "retrieve_most_viewed_under_load": 0.0,
            "retrieve_last_timecode_in_parallel": 0.0,
            "retrieve_most_viewed_in_parallel": 0.0,
        });
        assert!(serde_json::from_value::<ResultRecord>(json).is_err());
    }
}
