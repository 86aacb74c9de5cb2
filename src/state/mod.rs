//! State reducer: applies routed `(topic, payload)` pairs against the
//! canonical in-memory race state.
//!
//! Every handler merges rather than replaces, because upstream frames carry
//! deltas. Missing or malformed payload fields leave prior values untouched;
//! nothing in this module panics or returns an error.

use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

use crate::model::{
    DriverRecord, SectorStatus, SessionInfo, StateSnapshot, TimingValue, TireCompound, TrackFlag,
};

/// Canonical mutable state, owned by the connection manager. Consumers only
/// ever see [`StateSnapshot`]s derived from it.
#[derive(Debug, Default)]
pub struct RaceState {
    drivers: HashMap<String, DriverRecord>,
    pub session: SessionInfo,
    pub is_connected: bool,
    pub has_active_session: bool,
    pub error: Option<String>,
}

impl RaceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one routed topic. Unknown topics are ignored.
    pub fn apply(&mut self, topic: &str, payload: &Value) {
        match topic {
            "TimingData" => {
                self.apply_timing_data(payload);
                self.has_active_session = true;
            }
            "DriverList" => {
                self.apply_driver_list(payload);
                self.has_active_session = true;
            }
            "SessionInfo" => {
                self.apply_session_info(payload);
                self.has_active_session = true;
            }
            "TrackStatus" => self.apply_track_status(payload),
            "WeatherData" => {
                self.apply_weather(payload);
                self.has_active_session = true;
            }
            "LapCount" => {
                self.apply_lap_count(payload);
                self.has_active_session = true;
            }
            // Subscribed for liveness only; carries no session data.
            "Heartbeat" => {}
            other => {
                trace!(target = "pitwall::state", topic = other, "ignoring unknown topic");
            }
        }
    }

    /// Clear everything session-scoped. Connection status and the status
    /// string are managed separately by the connection manager.
    pub fn clear(&mut self) {
        self.drivers.clear();
        self.session = SessionInfo::default();
        self.has_active_session = false;
    }

    pub fn driver(&self, id: &str) -> Option<&DriverRecord> {
        self.drivers.get(id)
    }

    pub fn snapshot(&self, is_fallback: bool) -> StateSnapshot {
        let mut drivers: Vec<DriverRecord> = self.drivers.values().cloned().collect();
        drivers.sort_by_key(|d| (d.position == 0, d.position, d.numeric_id()));
        StateSnapshot {
            drivers,
            session: self.session.clone(),
            is_connected: self.is_connected,
            has_active_session: self.has_active_session,
            error: self.error.clone(),
            is_fallback,
        }
    }

    fn apply_timing_data(&mut self, payload: &Value) {
        // The driver map arrives either directly or wrapped in "Lines".
        let lines = payload
            .get("Lines")
            .and_then(Value::as_object)
            .or_else(|| payload.as_object());
        let Some(lines) = lines else {
            return;
        };
        for (id, fields) in lines {
            // Bookkeeping keys ride along with the driver map; only objects
            // describe drivers.
            if !fields.is_object() {
                continue;
            }
            let record = self
                .drivers
                .entry(id.clone())
                .or_insert_with(|| DriverRecord::new(id.clone()));
            merge_driver_fields(record, fields);
        }
    }

    fn apply_driver_list(&mut self, payload: &Value) {
        let Some(entries) = payload.as_object() else {
            return;
        };
        for (id, fields) in entries {
            // DriverList also carries bookkeeping keys that are not drivers.
            let Some(fields) = fields.as_object() else {
                continue;
            };
            let record = self
                .drivers
                .entry(id.clone())
                .or_insert_with(|| DriverRecord::new(id.clone()));
            if let Some(code) = fields.get("Tla").and_then(Value::as_str) {
                record.code = code.to_string();
            }
            if let Some(name) = fields
                .get("FullName")
                .or_else(|| fields.get("BroadcastName"))
                .and_then(Value::as_str)
            {
                record.name = name.to_string();
            }
            if let Some(team) = fields.get("TeamName").and_then(Value::as_str) {
                record.team = team.to_string();
            }
        }
    }

    fn apply_session_info(&mut self, payload: &Value) {
        let meeting = payload
            .get("Meeting")
            .and_then(|m| m.get("Name"))
            .and_then(Value::as_str);
        let name = payload.get("Name").and_then(Value::as_str);
        match (meeting, name) {
            (Some(meeting), Some(name)) => {
                self.session.session_name = format!("{meeting} - {name}");
            }
            (Some(meeting), None) => self.session.session_name = meeting.to_string(),
            (None, Some(name)) => self.session.session_name = name.to_string(),
            (None, None) => {}
        }
        if let Some(timer) = payload
            .get("SessionTimeLeft")
            .or_else(|| payload.get("Remaining"))
            .or_else(|| payload.get("Timer"))
            .and_then(Value::as_str)
        {
            self.session.timer = timer.to_string();
        }
    }

    fn apply_track_status(&mut self, payload: &Value) {
        let message = payload.get("Message").and_then(Value::as_str).unwrap_or("");
        let status = text_of(payload.get("Status")).unwrap_or_default();
        self.session.track_flag = track_flag_from(message, &status);
        if is_active_status(message, &status) {
            self.has_active_session = true;
        }
    }

    fn apply_weather(&mut self, payload: &Value) {
        let weather = &mut self.session.weather;
        if let Some(temp) = text_of(payload.get("TrackTemp")) {
            weather.track_temp = temp;
        }
        if let Some(temp) = text_of(payload.get("AirTemp")) {
            weather.air_temp = temp;
        }
        if let Some(humidity) = text_of(payload.get("Humidity")) {
            weather.humidity = humidity;
        }
        if let Some(rainfall) = number_of(payload.get("Rainfall")) {
            weather.condition = if rainfall > 0 { "Rain" } else { "Dry" }.to_string();
        }
    }

    fn apply_lap_count(&mut self, payload: &Value) {
        if let Some(current) = number_of(payload.get("CurrentLap")) {
            self.session.current_lap = current as u32;
        }
        if let Some(total) = number_of(payload.get("TotalLaps")) {
            self.session.total_laps = total as u32;
        }
    }
}

fn merge_driver_fields(record: &mut DriverRecord, fields: &Value) {
    let Some(fields) = fields.as_object() else {
        return;
    };
    if let Some(position) = number_of(fields.get("Position")) {
        record.position = position as u32;
    }
    if let Some(gap) = timing_text(fields.get("GapToLeader")) {
        record.gap_to_leader = gap;
    }
    if let Some(interval) = timing_text(fields.get("IntervalToPositionAhead")) {
        record.interval = interval;
    }
    if let Some(last_lap) = fields.get("LastLapTime") {
        merge_timing_value(&mut record.last_lap, last_lap);
    }
    if let Some(best) = timing_text(fields.get("BestLapTime")) {
        record.best_lap = best;
    }
    if let Some(sectors) = fields.get("Sectors") {
        for (index, sector) in indexed_entries(sectors) {
            if let Some(slot) = record.sectors.get_mut(index) {
                merge_timing_value(slot, sector);
            }
        }
    }
    if let Some(drs) = number_of(fields.get("DRS")) {
        // 10 and above are the feed's "wing open" codes; 8 is merely eligible.
        record.drs = drs >= 10;
    }
    let compound = fields
        .get("Compound")
        .and_then(Value::as_str)
        .map(TireCompound::parse)
        .or_else(|| latest_stint_compound(fields.get("Stints")));
    if let Some(compound) = compound {
        if compound != TireCompound::Unknown {
            record.record_compound(compound);
            record.stint = format!("Stint {}", record.tire_history.len());
        }
    }
}

/// Merge a `{Value, OverallFastest, PersonalFastest}` object (or a bare
/// string) into a timing slot, recomputing the display classification from
/// the payload flags.
fn merge_timing_value(slot: &mut TimingValue, value: &Value) {
    match value {
        Value::String(text) => {
            if !text.is_empty() {
                slot.value = text.clone();
            }
        }
        Value::Object(object) => {
            if let Some(text) = object.get("Value").and_then(Value::as_str) {
                if !text.is_empty() {
                    slot.value = text.to_string();
                }
            }
            slot.status = if truthy(object.get("OverallFastest")) {
                SectorStatus::OverallBest
            } else if truthy(object.get("PersonalFastest")) || truthy(object.get("PersonalBest")) {
                SectorStatus::PersonalBest
            } else {
                SectorStatus::Normal
            };
        }
        _ => {}
    }
}

/// Sector collections arrive as an array or as an object keyed by index.
fn indexed_entries(value: &Value) -> Vec<(usize, &Value)> {
    match value {
        Value::Array(items) => items.iter().enumerate().collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, item)| key.parse::<usize>().ok().map(|index| (index, item)))
            .collect(),
        _ => Vec::new(),
    }
}

fn latest_stint_compound(stints: Option<&Value>) -> Option<TireCompound> {
    let stints = stints?;
    let last = match stints {
        Value::Array(items) => items.last(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, item)| key.parse::<usize>().ok().map(|index| (index, item)))
            .max_by_key(|(index, _)| *index)
            .map(|(_, item)| item),
        _ => None,
    }?;
    last.get("Compound")
        .and_then(Value::as_str)
        .map(TireCompound::parse)
}

/// A value that is either a plain string or wrapped as `{"Value": …}`.
fn timing_text(value: Option<&Value>) -> Option<String> {
    let value = value?;
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(object) => object
            .get("Value")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn number_of(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_u64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn track_flag_from(message: &str, status: &str) -> TrackFlag {
    let message = message.to_ascii_lowercase();
    if message.contains("red") {
        return TrackFlag::Red;
    }
    if message.contains("yellow") || message.contains("vsc") || message.contains("safety") {
        return TrackFlag::Yellow;
    }
    if message.contains("clear") || message.contains("green") {
        return TrackFlag::Green;
    }
    match status {
        "1" => TrackFlag::Green,
        "2" | "4" | "6" | "7" => TrackFlag::Yellow,
        "5" => TrackFlag::Red,
        _ => TrackFlag::Unknown,
    }
}

/// Anything outside the explicit inactive set counts as an active session.
fn is_active_status(message: &str, status: &str) -> bool {
    let candidate = if message.is_empty() { status } else { message };
    let normalized: String = candidate
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    !matches!(
        normalized.as_str(),
        "" | "unknown" | "notstarted" | "finished" | "finalised" | "closed" | "noactive"
            | "noactivesession" | "inactive"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timing(lines: Value) -> Value {
        json!({ "Lines": lines })
    }

    #[test]
    fn merges_partial_driver_deltas_field_by_field() {
        let mut state = RaceState::new();
        state.apply(
            "TimingData",
            &timing(json!({
                "1": {
                    "Position": "1",
                    "LastLapTime": {"Value": "1:18.234", "OverallFastest": true},
                }
            })),
        );
        state.apply(
            "TimingData",
            &timing(json!({
                "1": { "Sectors": [{"Value": "23.456"}] }
            })),
        );

        let driver = state.driver("1").unwrap();
        assert_eq!(driver.position, 1);
        assert_eq!(driver.last_lap.value, "1:18.234");
        assert_eq!(driver.last_lap.status, SectorStatus::OverallBest);
        assert_eq!(driver.sectors[0].value, "23.456");
        assert_eq!(driver.sectors[1], TimingValue::default());
        assert_eq!(driver.sectors[2], TimingValue::default());
    }

    #[test]
    fn last_write_wins_per_field_not_per_record() {
        let mut state = RaceState::new();
        state.apply(
            "TimingData",
            &timing(json!({"44": {"Position": "3", "GapToLeader": "+1.2"}})),
        );
        state.apply(
            "TimingData",
            &timing(json!({"44": {"GapToLeader": "+0.8"}})),
        );
        state.apply("TimingData", &timing(json!({"44": {"Position": "2"}})));

        let driver = state.driver("44").unwrap();
        assert_eq!(driver.position, 2);
        assert_eq!(driver.gap_to_leader, "+0.8");
    }

    #[test]
    fn sector_flags_drive_classification() {
        let mut state = RaceState::new();
        state.apply(
            "TimingData",
            &timing(json!({
                "16": {
                    "Sectors": {
                        "0": {"Value": "24.1", "PersonalFastest": true},
                        "2": {"Value": "29.9", "OverallFastest": true},
                    }
                }
            })),
        );
        let driver = state.driver("16").unwrap();
        assert_eq!(driver.sectors[0].status, SectorStatus::PersonalBest);
        assert_eq!(driver.sectors[1].status, SectorStatus::Normal);
        assert_eq!(driver.sectors[2].status, SectorStatus::OverallBest);
    }

    #[test]
    fn twenty_drivers_sort_by_position_without_duplicates() {
        let mut state = RaceState::new();
        for number in 1..=20u32 {
            let id = number.to_string();
            // Arrival order deliberately scrambled relative to position.
            let position = (21 - number).to_string();
            state.apply(
                "TimingData",
                &timing(json!({ id: {"Position": position} })),
            );
        }
        let snapshot = state.snapshot(false);
        assert_eq!(snapshot.drivers.len(), 20);
        let positions: Vec<u32> = snapshot.drivers.iter().map(|d| d.position).collect();
        assert_eq!(positions, (1..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn unclassified_drivers_sort_last_with_numeric_tiebreak() {
        let mut state = RaceState::new();
        state.apply(
            "TimingData",
            &timing(json!({
                "7": {"Position": "0"},
                "3": {"Position": "0"},
                "11": {"Position": "1"},
            })),
        );
        let snapshot = state.snapshot(false);
        let ids: Vec<&str> = snapshot.drivers.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["11", "3", "7"]);
    }

    #[test]
    fn driver_list_fills_identity_fields() {
        let mut state = RaceState::new();
        state.apply(
            "DriverList",
            &json!({
                "1": {"Tla": "VER", "FullName": "Max Verstappen", "TeamName": "Red Bull Racing"},
                "_kf": true,
            }),
        );
        let driver = state.driver("1").unwrap();
        assert_eq!(driver.code, "VER");
        assert_eq!(driver.team, "Red Bull Racing");
        assert!(state.has_active_session);
    }

    #[test]
    fn track_status_active_set_flips_session_on() {
        let mut state = RaceState::new();
        state.apply("TrackStatus", &json!({"Status": "6", "Message": "NotStarted"}));
        assert!(!state.has_active_session);

        state.apply("TrackStatus", &json!({"Status": "1", "Message": "AllClear"}));
        assert!(state.has_active_session);
        assert_eq!(state.session.track_flag, TrackFlag::Green);
    }

    #[test]
    fn track_status_inactive_values_stay_idle() {
        for message in ["", "Finished", "Closed", "NoActive", "Unknown", "NotStarted"] {
            let mut state = RaceState::new();
            state.apply("TrackStatus", &json!({"Message": message, "Status": ""}));
            assert!(!state.has_active_session, "{message:?} should stay idle");
        }
    }

    #[test]
    fn weather_and_lap_count_merge_incrementally() {
        let mut state = RaceState::new();
        state.apply("WeatherData", &json!({"TrackTemp": "41.3", "Rainfall": "0"}));
        state.apply("WeatherData", &json!({"AirTemp": "27.9"}));
        state.apply("LapCount", &json!({"CurrentLap": 12}));
        state.apply("LapCount", &json!({"TotalLaps": 57}));

        assert_eq!(state.session.weather.track_temp, "41.3");
        assert_eq!(state.session.weather.air_temp, "27.9");
        assert_eq!(state.session.weather.condition, "Dry");
        assert_eq!(state.session.lap_count(), "12 / 57");
    }

    #[test]
    fn stint_compound_changes_append_to_history() {
        let mut state = RaceState::new();
        state.apply(
            "TimingData",
            &timing(json!({"55": {"Stints": [{"Compound": "SOFT"}]}})),
        );
        state.apply(
            "TimingData",
            &timing(json!({"55": {"Stints": [{"Compound": "SOFT"}]}})),
        );
        state.apply(
            "TimingData",
            &timing(json!({"55": {"Stints": [{"Compound": "SOFT"}, {"Compound": "HARD"}]}})),
        );
        let driver = state.driver("55").unwrap();
        assert_eq!(
            driver.tire_history,
            vec![TireCompound::Soft, TireCompound::Hard]
        );
        assert_eq!(driver.stint, "Stint 2");
        assert_eq!(driver.tire_compound, TireCompound::Hard);
    }

    #[test]
    fn malformed_payloads_never_disturb_prior_state() {
        let mut state = RaceState::new();
        state.apply("TimingData", &timing(json!({"4": {"Position": "5"}})));
        state.apply("TimingData", &json!("not an object"));
        state.apply("TimingData", &timing(json!({"4": {"Position": []}})));
        state.apply("WeatherData", &json!(null));
        state.apply("LapCount", &json!({"CurrentLap": {"nested": true}}));

        assert_eq!(state.driver("4").unwrap().position, 5);
    }

    #[test]
    fn clear_resets_session_scoped_state() {
        let mut state = RaceState::new();
        state.apply("TimingData", &timing(json!({"4": {"Position": "5"}})));
        state.apply("LapCount", &json!({"CurrentLap": 9}));
        state.clear();
        assert!(state.snapshot(false).drivers.is_empty());
        assert_eq!(state.session, SessionInfo::default());
        assert!(!state.has_active_session);
    }
}
