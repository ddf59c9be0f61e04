//! Client configuration.
//!
//! Settings live in a RON file; every field has a default, so an empty
//! file (or no file at all) yields a runnable configuration.
//!
//! ```ron
//! (
//!     tick_interval_ms: 250,
//!     step_timeout_ms: 10000,
//!     stall_warning_ms: 1000,
//!     peers: 2,
//!     steps: Some(40),
//!     level: Some("demos/canyon.ron"),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use lockstep_core::grid::LevelData;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default tick length: four steps per second.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;

/// Default limit on waiting for one authoritative step.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 10_000;

/// Default delay before a wait is reported as stalled.
pub const DEFAULT_STALL_WARNING_MS: u64 = 1_000;

/// Size of the built-in level, in tiles.
const OPEN_FIELD_TILES: u32 = 16;

/// Size of one built-in level tile, in pixels.
const OPEN_FIELD_TILE_SIZE: u32 = 16;

/// File-level client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Length of one step.
    pub tick_interval_ms: u64,
    /// Give up on a step after this long.
    pub step_timeout_ms: u64,
    /// Report a stall after this long, and again every interval after.
    pub stall_warning_ms: u64,
    /// Number of peers in a local match.
    pub peers: u32,
    /// Stop after this many gameplay steps; run until cancelled if unset.
    pub steps: Option<u64>,
    /// RON level file; a built-in open field when unset.
    pub level: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            stall_warning_ms: DEFAULT_STALL_WARNING_MS,
            peers: 2,
            steps: None,
            level: None,
        }
    }
}

impl ClientConfig {
    /// Parse configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] on a parse error or invalid values.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self =
            ron::from_str(text).map_err(|e| EngineError::Config(format!("invalid RON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a RON file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_ron_str(&text)
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(EngineError::Config("tick_interval_ms must be positive".into()));
        }
        if self.stall_warning_ms == 0 {
            return Err(EngineError::Config("stall_warning_ms must be positive".into()));
        }
        if self.step_timeout_ms < self.stall_warning_ms {
            return Err(EngineError::Config(
                "step_timeout_ms must not be shorter than stall_warning_ms".into(),
            ));
        }
        if self.peers == 0 {
            return Err(EngineError::Config("peers must be at least 1".into()));
        }
        Ok(())
    }

    /// Timing settings for [`StepEngine`](crate::engine::StepEngine).
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            step_timeout: Duration::from_millis(self.step_timeout_ms),
            stall_warning: Duration::from_millis(self.stall_warning_ms),
            max_steps: self.steps,
        }
    }

    /// Load the configured level, or build the default open field.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Game`] if the level file is missing or invalid.
    pub fn load_level(&self) -> Result<LevelData> {
        match &self.level {
            Some(path) => Ok(LevelData::load(path)?),
            None => Ok(LevelData::open_field(
                OPEN_FIELD_TILES,
                OPEN_FIELD_TILES,
                OPEN_FIELD_TILE_SIZE,
                OPEN_FIELD_TILE_SIZE,
            )),
        }
    }
}

/// Engine timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Length of one step.
    pub tick_interval: Duration,
    /// Bound on waiting for one authoritative step.
    pub step_timeout: Duration,
    /// Stall reporting interval.
    pub stall_warning: Duration,
    /// Stop [`run`](crate::engine::StepEngine::run) after this many steps.
    pub max_steps: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        ClientConfig::default().engine_config()
    }
}
