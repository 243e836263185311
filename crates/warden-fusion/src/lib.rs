//! Groups `SensorReading`s into `EntityTrack` summaries and per-domain counts.

#![deny(unsafe_code)]

use std::collections::HashMap;
use warden_core::types::{DomainCounts, EntityTrack, SensorReading};

/// Result of a fusion pass.
#[derive(Debug, Default)]
pub struct FusionOutcome {
    /// One track per `(domain, track key)` group, in first-seen order.
    pub tracks: Vec<EntityTrack>,
    /// Reading count per domain.
    pub domain_counts: DomainCounts,
}

fn track_key(reading: &SensorReading) -> String {
    match reading.track_id() {
        Some(track_id) => track_id.to_string(),
        None => format!("anon_{}_{}", reading.domain, reading.sensor_id),
    }
}

/// Fuse a batch of readings into entity tracks and per-domain counts.
#[must_use]
pub fn fuse(readings: &[SensorReading]) -> FusionOutcome {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, EntityTrack> = HashMap::new();
    let mut domain_counts: DomainCounts = HashMap::new();

    for reading in readings {
        *domain_counts.entry(reading.domain.clone()).or_insert(0) += 1;

        let key = track_key(reading);
        let id = format!("{}:{}", reading.domain, key);

        by_id
            .entry(id.clone())
            .and_modify(|track| {
                track.last_seen_ms = track.last_seen_ms.max(reading.ts_ms);
                for (k, v) in &reading.details {
                    track.attributes.insert(k.clone(), v.clone());
                }
            })
            .or_insert_with(|| {
                order.push(id.clone());
                EntityTrack {
                    id: id.clone(),
                    domain: reading.domain.clone(),
                    label: key.clone(),
                    attributes: reading.details.clone(),
                    last_seen_ms: reading.ts_ms,
                }
            });
    }

    let tracks = order.into_iter().map(|id| by_id.remove(&id).expect("tracked id present")).collect();
    FusionOutcome { tracks, domain_counts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::types::Details;

    fn reading(id: &str, domain: &str, sensor_id: &str, ts_ms: i64, details: Details) -> SensorReading {
        SensorReading {
            id: id.to_string(),
            sensor_id: sensor_id.to_string(),
            domain: domain.to_string(),
            source_type: "t".to_string(),
            ts_ms,
            geo: None,
            details,
        }
    }

    fn details(v: serde_json::Value) -> Details {
        match v {
            serde_json::Value::Object(m) => m,
            _ => Details::new(),
        }
    }

    #[test]
    fn groups_by_explicit_track_id() {
        let readings = vec![
            reading("r1", "air", "s1", 100, details(json!({"track_id": "t1"}))),
            reading("r2", "air", "s2", 200, details(json!({"track_id": "t1"}))),
        ];
        let outcome = fuse(&readings);
        assert_eq!(outcome.tracks.len(), 1);
        assert_eq!(outcome.tracks[0].last_seen_ms, 200);
        assert_eq!(outcome.domain_counts.get("air"), Some(&2));
    }

    #[test]
    fn anonymous_readings_group_by_domain_and_sensor() {
        let readings = vec![
            reading("r1", "air", "s1", 100, Details::new()),
            reading("r2", "air", "s2", 100, Details::new()),
        ];
        let outcome = fuse(&readings);
        assert_eq!(outcome.tracks.len(), 2);
    }
}
