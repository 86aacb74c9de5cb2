//! Data model for the live timing state: per-driver records, session
//! metadata, and the snapshot surface consumers observe.

use serde::Serialize;
use std::fmt;

/// Display classification attached to a timing value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectorStatus {
    #[default]
    Normal,
    PersonalBest,
    OverallBest,
}

/// A timing value (lap or sector) paired with its display classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingValue {
    pub value: String,
    pub status: SectorStatus,
}

impl TimingValue {
    pub fn new(value: impl Into<String>, status: SectorStatus) -> Self {
        Self {
            value: value.into(),
            status,
        }
    }
}

/// Tire compound as reported by the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TireCompound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
    #[default]
    Unknown,
}

impl TireCompound {
    /// Lenient parse from the upstream compound string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SOFT" | "S" => TireCompound::Soft,
            "MEDIUM" | "M" => TireCompound::Medium,
            "HARD" | "H" => TireCompound::Hard,
            "INTERMEDIATE" | "I" => TireCompound::Intermediate,
            "WET" | "W" => TireCompound::Wet,
            _ => TireCompound::Unknown,
        }
    }
}

impl fmt::Display for TireCompound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TireCompound::Soft => "Soft",
            TireCompound::Medium => "Medium",
            TireCompound::Hard => "Hard",
            TireCompound::Intermediate => "Intermediate",
            TireCompound::Wet => "Wet",
            TireCompound::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// One car's current timing state. Created on first sighting of a driver
/// identifier and merged in place by subsequent deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverRecord {
    /// Stable driver identifier (race number as reported by the feed).
    pub id: String,
    /// 1-based classified position; 0 means not yet classified.
    pub position: u32,
    /// Three letter display code (e.g. "VER").
    pub code: String,
    pub name: String,
    pub team: String,
    pub tire_compound: TireCompound,
    pub stint: String,
    pub drs: bool,
    /// Gap to the leader, upstream-formatted.
    pub gap_to_leader: String,
    /// Interval to the car ahead, upstream-formatted.
    pub interval: String,
    pub last_lap: TimingValue,
    pub best_lap: String,
    pub sectors: [TimingValue; 3],
    /// Compounds actually used this session, consecutive repeats deduplicated.
    pub tire_history: Vec<TireCompound>,
}

impl DriverRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Append a compound to the history unless it matches the latest entry.
    pub fn record_compound(&mut self, compound: TireCompound) {
        self.tire_compound = compound;
        if self.tire_history.last() != Some(&compound) {
            self.tire_history.push(compound);
        }
    }

    /// Numeric form of the identifier, used as a sort tiebreaker.
    /// Non-numeric identifiers sort after numeric ones.
    pub fn numeric_id(&self) -> u32 {
        self.id.trim().parse().unwrap_or(u32::MAX)
    }
}

/// Track flag state distilled from the feed's free-text status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackFlag {
    Green,
    Yellow,
    Red,
    #[default]
    Unknown,
}

impl fmt::Display for TrackFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrackFlag::Green => "Green",
            TrackFlag::Yellow => "Yellow",
            TrackFlag::Red => "Red",
            TrackFlag::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherInfo {
    pub track_temp: String,
    pub air_temp: String,
    pub humidity: String,
    pub condition: String,
}

/// Session-wide metadata, mutated incrementally as matching topics arrive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_name: String,
    /// Countdown or elapsed timer string, upstream-formatted.
    pub timer: String,
    pub weather: WeatherInfo,
    pub current_lap: u32,
    pub total_laps: u32,
    pub track_flag: TrackFlag,
}

impl SessionInfo {
    /// Lap counter in the "current / total" form the UI renders.
    pub fn lap_count(&self) -> String {
        format!("{} / {}", self.current_lap, self.total_laps)
    }
}

/// The published view of current race state. Cheap to clone; consumers
/// never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Drivers sorted by position; unclassified (position 0) entries last.
    pub drivers: Vec<DriverRecord>,
    pub session: SessionInfo,
    pub is_connected: bool,
    pub has_active_session: bool,
    /// Short-lived user-facing status string, never a stack trace.
    pub error: Option<String>,
    pub is_fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_parse_accepts_full_and_short_forms() {
        assert_eq!(TireCompound::parse("SOFT"), TireCompound::Soft);
        assert_eq!(TireCompound::parse("soft"), TireCompound::Soft);
        assert_eq!(TireCompound::parse("I"), TireCompound::Intermediate);
        assert_eq!(TireCompound::parse("W"), TireCompound::Wet);
        assert_eq!(TireCompound::parse("qualifying"), TireCompound::Unknown);
    }

    #[test]
    fn tire_history_deduplicates_consecutive_repeats() {
        let mut record = DriverRecord::new("44");
        record.record_compound(TireCompound::Soft);
        record.record_compound(TireCompound::Soft);
        record.record_compound(TireCompound::Hard);
        record.record_compound(TireCompound::Soft);
        assert_eq!(
            record.tire_history,
            vec![TireCompound::Soft, TireCompound::Hard, TireCompound::Soft]
        );
    }

    #[test]
    fn numeric_id_sorts_non_numeric_last() {
        assert_eq!(DriverRecord::new("4").numeric_id(), 4);
        assert_eq!(DriverRecord::new("TST").numeric_id(), u32::MAX);
    }
}
