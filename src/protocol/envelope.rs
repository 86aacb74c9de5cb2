//! Message router: normalizes the feed's historical envelope shapes into
//! uniform `(topic, payload)` pairs.
//!
//! Two generations of envelope exist side by side upstream: a flat
//! `{target, arguments}` invocation and a batched `{M: [{H, A}]}` form, the
//! latter occasionally re-wrapping another `M` array one level deep. Anything
//! else that is a non-empty object still proves the socket is alive.

use serde_json::{json, Value};

use super::frame::RECORD_SEPARATOR;

/// What a routed frame says about the connection, beyond any data it carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Nothing to conclude (malformed or empty frame).
    Silent,
    /// The socket is alive and a session is plausibly active.
    Alive,
    /// An explicit empty batch: connected, but no session activity this tick.
    IdleTick,
}

/// Result of routing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub updates: Vec<(String, Value)>,
    pub liveness: Liveness,
}

impl Routed {
    fn silent() -> Self {
        Self {
            updates: Vec::new(),
            liveness: Liveness::Silent,
        }
    }
}

/// Normalize one parsed frame. Never fails: unrecognized shapes degrade to
/// a liveness signal or to nothing at all.
pub fn route(frame: &Value) -> Routed {
    let Some(object) = frame.as_object() else {
        return Routed::silent();
    };
    if object.is_empty() {
        return Routed::silent();
    }

    let mut updates = Vec::new();

    // Flat invocation form: { target, arguments: [topic, payload] }.
    if object.get("target").and_then(Value::as_str).is_some() {
        if let Some(arguments) = object.get("arguments").and_then(Value::as_array) {
            push_update(&mut updates, arguments);
        }
        return Routed {
            updates,
            liveness: Liveness::Alive,
        };
    }

    // Batched form: { M: [ {H, A}, ... ] }, possibly re-wrapped one level.
    if let Some(batch) = object.get("M").and_then(Value::as_array) {
        if batch.is_empty() {
            return Routed {
                updates,
                liveness: Liveness::IdleTick,
            };
        }
        for item in batch {
            collect_batch_item(&mut updates, item, true);
        }
        return Routed {
            updates,
            liveness: Liveness::Alive,
        };
    }

    // Unknown but non-empty: the socket is alive, nothing else to say.
    Routed {
        updates,
        liveness: Liveness::Alive,
    }
}

fn collect_batch_item(updates: &mut Vec<(String, Value)>, item: &Value, unwrap_nested: bool) {
    let Some(object) = item.as_object() else {
        return;
    };
    if object.get("H").and_then(Value::as_str).is_some() {
        if let Some(arguments) = object.get("A").and_then(Value::as_array) {
            push_update(updates, arguments);
        }
        return;
    }
    // One level of re-wrapping: an M entry holding another M array.
    if unwrap_nested {
        if let Some(nested) = object.get("M").and_then(Value::as_array) {
            for inner in nested {
                collect_batch_item(updates, inner, false);
            }
        }
    }
}

fn push_update(updates: &mut Vec<(String, Value)>, arguments: &[Value]) {
    let Some(topic) = arguments.first().and_then(Value::as_str) else {
        return;
    };
    let Some(payload) = arguments.get(1) else {
        return;
    };
    updates.push((topic.to_string(), payload.clone()));
}

/// Client→server subscription frame listing the required topics,
/// terminated by the wire delimiter.
pub fn subscribe_frame(topics: &[String]) -> String {
    let mut frame = json!({
        "H": "Streaming",
        "M": "Subscribe",
        "A": [topics],
        "I": 1,
    })
    .to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routes_flat_invocation_form() {
        let frame = json!({
            "target": "Streaming",
            "arguments": ["TimingData", {"Lines": {}}],
        });
        let routed = route(&frame);
        assert_eq!(routed.liveness, Liveness::Alive);
        assert_eq!(routed.updates.len(), 1);
        assert_eq!(routed.updates[0].0, "TimingData");
    }

    #[test]
    fn routes_batched_form() {
        let frame = json!({
            "C": "d-1,0",
            "M": [
                {"H": "Streaming", "A": ["TrackStatus", {"Status": "1"}]},
                {"H": "Streaming", "A": ["LapCount", {"CurrentLap": 3}]},
            ],
        });
        let routed = route(&frame);
        assert_eq!(routed.liveness, Liveness::Alive);
        let topics: Vec<&str> = routed.updates.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(topics, vec!["TrackStatus", "LapCount"]);
    }

    #[test]
    fn unwraps_one_level_of_nested_batches() {
        let frame = json!({
            "M": [
                {"M": [{"H": "Streaming", "A": ["WeatherData", {"AirTemp": "21"}]}]},
            ],
        });
        let routed = route(&frame);
        assert_eq!(routed.updates.len(), 1);
        assert_eq!(routed.updates[0].0, "WeatherData");
    }

    #[test]
    fn empty_batch_is_an_idle_tick_not_an_error() {
        let routed = route(&json!({"M": []}));
        assert_eq!(routed.liveness, Liveness::IdleTick);
        assert!(routed.updates.is_empty());
    }

    #[test]
    fn unknown_non_empty_object_counts_as_alive() {
        let routed = route(&json!({"C": "d-2,1", "S": 1}));
        assert_eq!(routed.liveness, Liveness::Alive);
        assert!(routed.updates.is_empty());
    }

    #[test]
    fn empty_object_and_non_objects_are_silent() {
        assert_eq!(route(&json!({})).liveness, Liveness::Silent);
        assert_eq!(route(&json!(42)).liveness, Liveness::Silent);
        assert_eq!(route(&json!("ping")).liveness, Liveness::Silent);
    }

    #[test]
    fn malformed_arguments_yield_no_updates() {
        let routed = route(&json!({"target": "Streaming", "arguments": ["TimingData"]}));
        assert!(routed.updates.is_empty());
        let routed = route(&json!({"target": "Streaming", "arguments": [7, {}]}));
        assert!(routed.updates.is_empty());
    }

    #[test]
    fn subscribe_frame_names_topics_and_is_delimited() {
        let topics = vec!["TimingData".to_string(), "Heartbeat".to_string()];
        let frame = subscribe_frame(&topics);
        assert!(frame.ends_with(RECORD_SEPARATOR));
        let parsed: Value = serde_json::from_str(frame.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(parsed["H"], "Streaming");
        assert_eq!(parsed["M"], "Subscribe");
        assert_eq!(parsed["A"][0][0], "TimingData");
    }
}
