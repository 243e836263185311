//! Declarative rule engine: `when` predicates over `SensorReading`s produce
//! `Event`s from a `then` template. Loaded from a standalone YAML document,
//! the same way the teacher workspace's governance engine loads its
//! `PolicyFile` via `serde_yaml::from_reader`.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use warden_core::canonical::sha256_of_canonical;
use warden_core::types::{Details, Event, EventStatus, Evidence, Severity, SensorReading, TimeWindow};
use warden_core::PipelineError;

/// One `when.condition` variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// `details.altitude_ft < threshold`.
    AltitudeBelow {
        /// Numeric cutoff.
        threshold: f64,
    },
    /// `details.night_motion == true`.
    NightMotion,
    /// `details.scan_count >= threshold`.
    PortScan {
        /// Numeric cutoff.
        threshold: f64,
    },
    /// Case-insensitive substring match of `threshold` in `details.text`.
    Keyword {
        /// Needle to search for.
        threshold: String,
    },
    /// Every key/value in `map` must equal the corresponding entry in `details`.
    DetailsEquals {
        /// Expected key/value pairs.
        map: Details,
    },
}

/// Match predicate for a rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct When {
    /// Optional exact domain match.
    #[serde(default)]
    pub domain: Option<String>,
    /// Optional exact source-type match.
    #[serde(default)]
    pub source_type: Option<String>,
    /// Optional extra condition.
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// Event template emitted when a rule matches.
#[derive(Debug, Clone, Deserialize)]
pub struct Then {
    /// Event category.
    pub category: String,
    /// Event severity; defaults to `info`.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Human-readable summary.
    pub summary: String,
}

/// A single declarative rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    /// Rule id, used to build the emitted event's id and tag.
    pub id: String,
    /// Match predicate.
    pub when: When,
    /// Event template.
    pub then: Then,
}

/// Top-level rule file shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleFile {
    /// Rules, evaluated in declaration order.
    pub rules: Vec<RuleDef>,
}

/// Deterministic declarative rule engine.
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    rules: Vec<RuleDef>,
}

impl RulesEngine {
    /// Load a rule file from `path`.
    pub fn load_from_yaml(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|e| PipelineError::ConfigError {
            path: path.display().to_string(),
            message: format!("failed to open rules file: {e}"),
        })?;
        let reader = BufReader::new(file);
        let parsed: RuleFile =
            serde_yaml::from_reader(reader).map_err(|e| PipelineError::ConfigError {
                path: path.display().to_string(),
                message: format!("invalid rules YAML: {e}"),
            })?;
        for (i, r) in parsed.rules.iter().enumerate() {
            if r.id.trim().is_empty() {
                return Err(PipelineError::ConfigError {
                    path: path.display().to_string(),
                    message: format!("rules[{i}].id must be non-empty"),
                });
            }
        }
        Ok(Self { rules: parsed.rules })
    }

    /// Evaluate every rule against every reading, in `(reading order, rule
    /// order)`. Fails with `ConfigError` if two emitted events share an id,
    /// which implies a rule misconfiguration.
    pub fn evaluate(&self, readings: &[SensorReading]) -> Result<Vec<Event>, PipelineError> {
        let mut events = Vec::new();
        let mut seen_ids = HashSet::new();

        for reading in readings {
            for rule in &self.rules {
                if !matches(&rule.when, reading) {
                    continue;
                }
                let event = build_event(rule, reading)?;
                if !seen_ids.insert(event.id.clone()) {
                    return Err(PipelineError::ConfigError {
                        path: "rules_file".to_string(),
                        message: format!("duplicate event id '{}': rule misconfiguration", event.id),
                    });
                }
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn matches(when: &When, reading: &SensorReading) -> bool {
    if let Some(domain) = &when.domain {
        if domain != &reading.domain {
            return false;
        }
    }
    if let Some(source_type) = &when.source_type {
        if source_type != &reading.source_type {
            return false;
        }
    }
    match &when.condition {
        None => true,
        Some(Condition::AltitudeBelow { threshold }) => reading
            .details
            .get("altitude_ft")
            .and_then(serde_json::Value::as_f64)
            .is_some_and(|v| v < *threshold),
        Some(Condition::NightMotion) => {
            reading.details.get("night_motion").and_then(serde_json::Value::as_bool) == Some(true)
        }
        Some(Condition::PortScan { threshold }) => reading
            .details
            .get("scan_count")
            .and_then(serde_json::Value::as_f64)
            .is_some_and(|v| v >= *threshold),
        Some(Condition::Keyword { threshold }) => reading
            .details
            .get("text")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|text| text.to_lowercase().contains(&threshold.to_lowercase())),
        Some(Condition::DetailsEquals { map }) => {
            map.iter().all(|(k, v)| reading.details.get(k) == Some(v))
        }
    }
}

fn build_event(rule: &RuleDef, reading: &SensorReading) -> Result<Event, PipelineError> {
    let hash = sha256_of_canonical(&reading.details).map_err(|e| PipelineError::InputFormat(format!(
        "unhashable reading details: {e}"
    )))?;
    Ok(Event {
        id: format!("ev_{}_{}", reading.id, rule.id),
        category: rule.then.category.clone(),
        severity: rule.then.severity.unwrap_or(Severity::Info),
        status: EventStatus::Open,
        domain: reading.domain.clone(),
        summary: rule.then.summary.clone(),
        time_window: TimeWindow { start_ms: reading.ts_ms, end_ms: reading.ts_ms },
        entities: vec![reading.track_id().unwrap_or("unknown").to_string()],
        sources: vec![reading.sensor_id.clone()],
        tags: vec![rule.id.clone()],
        evidence: vec![Evidence {
            kind: "sensor_reading".to_string(),
            id: reading.id.clone(),
            source: reading.sensor_id.clone(),
            hash,
            observables: reading.details.clone(),
        }],
        tenant: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(id: &str, domain: &str, source_type: &str, details: Details) -> SensorReading {
        SensorReading {
            id: id.to_string(),
            sensor_id: format!("sensor_{id}"),
            domain: domain.to_string(),
            source_type: source_type.to_string(),
            ts_ms: 1_000,
            geo: None,
            details,
        }
    }

    fn details_from(json_obj: serde_json::Value) -> Details {
        match json_obj {
            serde_json::Value::Object(m) => m,
            _ => Details::new(),
        }
    }

    #[test]
    fn altitude_below_matches_when_lower() {
        let rules = RulesEngine {
            rules: vec![RuleDef {
                id: "low_alt".to_string(),
                when: When {
                    domain: Some("air".to_string()),
                    source_type: None,
                    condition: Some(Condition::AltitudeBelow { threshold: 500.0 }),
                },
                then: Then { category: "airspace".to_string(), severity: None, summary: "low altitude".to_string() },
            }],
        };
        let r = reading("r1", "air", "radar", details_from(json!({"altitude_ft": 200})));
        let events = rules.evaluate(&[r]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "ev_r1_low_alt");
        assert_eq!(events[0].severity, Severity::Info);
    }

    #[test]
    fn no_match_when_condition_fails() {
        let rules = RulesEngine {
            rules: vec![RuleDef {
                id: "low_alt".to_string(),
                when: When {
                    domain: None,
                    source_type: None,
                    condition: Some(Condition::AltitudeBelow { threshold: 100.0 }),
                },
                then: Then { category: "airspace".to_string(), severity: None, summary: "x".to_string() },
            }],
        };
        let r = reading("r1", "air", "radar", details_from(json!({"altitude_ft": 200})));
        assert!(rules.evaluate(&[r]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_event_ids_fail_loudly() {
        let rule = RuleDef {
            id: "dup".to_string(),
            when: When::default(),
            then: Then { category: "c".to_string(), severity: None, summary: "s".to_string() },
        };
        let rules = RulesEngine { rules: vec![rule.clone(), rule] };
        let r = reading("r1", "air", "radar", Details::new());
        let err = rules.evaluate(&[r]).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError { .. }));
    }

    #[test]
    fn keyword_is_case_insensitive() {
        let rules = RulesEngine {
            rules: vec![RuleDef {
                id: "kw".to_string(),
                when: When {
                    domain: None,
                    source_type: None,
                    condition: Some(Condition::Keyword { threshold: "alert".to_string() }),
                },
                then: Then { category: "c".to_string(), severity: None, summary: "s".to_string() },
            }],
        };
        let r = reading("r1", "cyber", "log", details_from(json!({"text": "SECURITY ALERT triggered"})));
        assert_eq!(rules.evaluate(&[r]).unwrap().len(), 1);
    }
}
