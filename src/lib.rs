//! Live race-telemetry ingestion client.
//!
//! Connects to a multiplexed, delimiter-framed push feed, reconstructs a
//! continuously updated view of current race state, and publishes it as a
//! cheap-to-clone snapshot. Includes a synthetic fallback session for when
//! the live feed is unavailable.

pub mod client;
pub mod config;
pub mod fallback;
pub mod model;
pub mod protocol;
pub mod session;
pub mod state;
pub mod telemetry;

pub use client::{ClientError, LiveTimingClient};
pub use config::LiveTimingConfig;
pub use model::{
    DriverRecord, SectorStatus, SessionInfo, StateSnapshot, TimingValue, TireCompound, TrackFlag,
    WeatherInfo,
};
