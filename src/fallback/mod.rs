//! Fallback simulator: a self-consistent synthetic session used whenever
//! the live feed cannot be established or is not wanted.
//!
//! The simulator holds no timer of its own. The connection manager drives
//! `tick()` from its own loop, so dropping the session stops everything.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::model::{
    DriverRecord, SectorStatus, SessionInfo, StateSnapshot, TimingValue, TireCompound, TrackFlag,
    WeatherInfo,
};

/// Fixed roster: race number, code, name, team, starting compound, base
/// lap pace in seconds.
const ROSTER: &[(&str, &str, &str, &str, TireCompound, f64)] = &[
    ("1", "VER", "Max Verstappen", "Red Bull Racing", TireCompound::Medium, 92.1),
    ("11", "PER", "Sergio Perez", "Red Bull Racing", TireCompound::Medium, 92.6),
    ("44", "HAM", "Lewis Hamilton", "Mercedes", TireCompound::Soft, 92.4),
    ("63", "RUS", "George Russell", "Mercedes", TireCompound::Medium, 92.5),
    ("16", "LEC", "Charles Leclerc", "Ferrari", TireCompound::Soft, 92.3),
    ("55", "SAI", "Carlos Sainz", "Ferrari", TireCompound::Medium, 92.5),
    ("4", "NOR", "Lando Norris", "McLaren", TireCompound::Soft, 92.2),
    ("81", "PIA", "Oscar Piastri", "McLaren", TireCompound::Medium, 92.4),
    ("14", "ALO", "Fernando Alonso", "Aston Martin", TireCompound::Hard, 92.8),
    ("18", "STR", "Lance Stroll", "Aston Martin", TireCompound::Hard, 93.1),
    ("10", "GAS", "Pierre Gasly", "Alpine", TireCompound::Medium, 93.0),
    ("31", "OCO", "Esteban Ocon", "Alpine", TireCompound::Medium, 93.1),
    ("23", "ALB", "Alexander Albon", "Williams", TireCompound::Hard, 93.2),
    ("2", "SAR", "Logan Sargeant", "Williams", TireCompound::Hard, 93.5),
    ("22", "TSU", "Yuki Tsunoda", "RB", TireCompound::Medium, 93.0),
    ("3", "RIC", "Daniel Ricciardo", "RB", TireCompound::Medium, 93.1),
    ("77", "BOT", "Valtteri Bottas", "Sauber", TireCompound::Hard, 93.3),
    ("24", "ZHO", "Guanyu Zhou", "Sauber", TireCompound::Hard, 93.4),
    ("20", "MAG", "Kevin Magnussen", "Haas", TireCompound::Medium, 93.2),
    ("27", "HUL", "Nico Hulkenberg", "Haas", TireCompound::Medium, 93.2),
];

const TOTAL_LAPS: u32 = 57;
const TICK: Duration = Duration::from_millis(1500);

pub struct FallbackSession {
    drivers: Vec<DriverRecord>,
    session: SessionInfo,
    paces: Vec<f64>,
    elapsed: Duration,
    best_overall: f64,
    personal_bests: Vec<f64>,
    rng: StdRng,
}

impl Default for FallbackSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackSession {
    pub fn new() -> Self {
        let mut drivers = Vec::with_capacity(ROSTER.len());
        let mut paces = Vec::with_capacity(ROSTER.len());
        let mut gap = 0.0f64;
        for (index, (id, code, name, team, compound, pace)) in ROSTER.iter().enumerate() {
            let mut record = DriverRecord::new(*id);
            record.position = index as u32 + 1;
            record.code = (*code).to_string();
            record.name = (*name).to_string();
            record.team = (*team).to_string();
            record.record_compound(*compound);
            record.stint = "Stint 1".to_string();
            record.last_lap = TimingValue::new(format_lap(*pace), SectorStatus::Normal);
            record.best_lap = format_lap(*pace);
            if index == 0 {
                record.gap_to_leader = String::new();
                record.interval = String::new();
            } else {
                gap += 0.4 + 0.3 * index as f64;
                record.gap_to_leader = format!("+{gap:.3}");
                record.interval = format!("+{:.3}", 0.4 + 0.3 * index as f64);
            }
            drivers.push(record);
            paces.push(*pace);
        }

        let session = SessionInfo {
            session_name: "Simulated Grand Prix - Race".to_string(),
            timer: "0:00:00".to_string(),
            weather: WeatherInfo {
                track_temp: "38.5".to_string(),
                air_temp: "24.0".to_string(),
                humidity: "52".to_string(),
                condition: "Dry".to_string(),
            },
            current_lap: 1,
            total_laps: TOTAL_LAPS,
            track_flag: TrackFlag::Green,
        };

        let personal_bests = paces.clone();
        let best_overall = paces.iter().copied().fold(f64::INFINITY, f64::min);
        Self {
            drivers,
            session,
            paces,
            elapsed: Duration::ZERO,
            best_overall,
            personal_bests,
            rng: StdRng::from_entropy(),
        }
    }

    /// Advance the synthetic session by one tick interval.
    pub fn tick(&mut self) {
        self.elapsed += TICK;
        self.session.timer = format_clock(self.elapsed);
        // Roughly one racing lap per 90 seconds of session time.
        let lap = 1 + (self.elapsed.as_secs() / 90) as u32;
        self.session.current_lap = lap.min(TOTAL_LAPS);

        for index in 0..self.drivers.len() {
            let pace = self.paces[index];
            let lap_time = pace + self.rng.gen_range(-0.6..1.2);
            let status = if lap_time < self.best_overall {
                self.best_overall = lap_time;
                self.personal_bests[index] = lap_time;
                SectorStatus::OverallBest
            } else if lap_time < self.personal_bests[index] {
                self.personal_bests[index] = lap_time;
                SectorStatus::PersonalBest
            } else {
                SectorStatus::Normal
            };

            let driver = &mut self.drivers[index];
            driver.last_lap = TimingValue::new(format_lap(lap_time), status);
            if status != SectorStatus::Normal {
                driver.best_lap = format_lap(lap_time);
            }

            // Split the lap into three plausible sectors with local jitter.
            let splits = [0.30, 0.34, 0.36];
            for (slot, share) in driver.sectors.iter_mut().zip(splits) {
                let sector = lap_time * share + self.rng.gen::<f64>() * 0.2;
                let sector_status = match status {
                    SectorStatus::Normal => SectorStatus::Normal,
                    other => {
                        if self.rng.gen_bool(0.5) {
                            other
                        } else {
                            SectorStatus::Normal
                        }
                    }
                };
                *slot = TimingValue::new(format!("{sector:.3}"), sector_status);
            }
            driver.drs = self.rng.gen_bool(0.25);
        }

        // Occasional position swap between two adjacent cars.
        if self.drivers.len() > 1 && self.rng.gen_bool(0.15) {
            let index = self.rng.gen_range(0..self.drivers.len() - 1);
            self.drivers.swap(index, index + 1);
            self.paces.swap(index, index + 1);
            self.personal_bests.swap(index, index + 1);
            for (position, driver) in self.drivers.iter_mut().enumerate() {
                driver.position = position as u32 + 1;
            }
        }

        // Occasional pit stop onto a different compound.
        if self.rng.gen_bool(0.05) {
            let index = self.rng.gen_range(0..self.drivers.len());
            let driver = &mut self.drivers[index];
            let next = match driver.tire_compound {
                TireCompound::Soft => TireCompound::Hard,
                TireCompound::Medium => TireCompound::Soft,
                _ => TireCompound::Medium,
            };
            driver.record_compound(next);
            driver.stint = format!("Stint {}", driver.tire_history.len());
        }

        // Refresh the running order strings from current ordering.
        let mut gap = 0.0f64;
        for (position, driver) in self.drivers.iter_mut().enumerate() {
            if position == 0 {
                driver.gap_to_leader = String::new();
                driver.interval = String::new();
            } else {
                let interval = 0.3 + (position as f64) * 0.25;
                gap += interval;
                driver.gap_to_leader = format!("+{gap:.3}");
                driver.interval = format!("+{interval:.3}");
            }
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            drivers: self.drivers.clone(),
            session: self.session.clone(),
            is_connected: false,
            has_active_session: true,
            error: None,
            is_fallback: true,
        }
    }
}

fn format_lap(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor() as u32;
    let remainder = seconds - minutes as f64 * 60.0;
    format!("{minutes}:{remainder:06.3}")
}

fn format_clock(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_shape_is_stable_across_sessions() {
        let first = FallbackSession::new();
        let second = FallbackSession::new();
        assert_eq!(first.drivers.len(), 20);
        assert_eq!(first.drivers.len(), second.drivers.len());
        for (a, b) in first.drivers.iter().zip(second.drivers.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.code, b.code);
            assert_eq!(a.team, b.team);
            assert_eq!(a.tire_history.len(), b.tire_history.len());
        }
        let positions: Vec<u32> = first.drivers.iter().map(|d| d.position).collect();
        assert_eq!(positions, (1..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn tick_advances_clock_and_keeps_positions_contiguous() {
        let mut session = FallbackSession::new();
        for _ in 0..40 {
            session.tick();
        }
        assert_eq!(session.elapsed, TICK * 40);
        assert_ne!(session.session.timer, "0:00:00");

        let mut positions: Vec<u32> = session.drivers.iter().map(|d| d.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (1..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn tick_produces_plausible_lap_strings() {
        let mut session = FallbackSession::new();
        session.tick();
        for driver in &session.drivers {
            assert!(driver.last_lap.value.starts_with("1:"), "{}", driver.last_lap.value);
            for sector in &driver.sectors {
                assert!(!sector.value.is_empty());
            }
        }
    }

    #[test]
    fn snapshot_marks_fallback_mode() {
        let session = FallbackSession::new();
        let snapshot = session.snapshot();
        assert!(snapshot.is_fallback);
        assert!(snapshot.has_active_session);
        assert!(!snapshot.is_connected);
        assert_eq!(snapshot.drivers.len(), 20);
    }

    #[test]
    fn lap_formatting_pads_seconds() {
        assert_eq!(format_lap(92.1), "1:32.100");
        assert_eq!(format_lap(61.0), "1:01.000");
        assert_eq!(format_clock(Duration::from_secs(3725)), "1:02:05");
    }
}
