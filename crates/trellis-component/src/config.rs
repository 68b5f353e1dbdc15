//! Update configuration
//!
//! Parsed from the optional `[update]` table of a TOML document:
//!
//! ```toml
//! [update]
//! loop_limit = 10
//! frame_interval_ms = 16
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;
use trellis_zone::{EventLoop, DEFAULT_FRAME_INTERVAL_MS};

use crate::error::ComponentResult;

/// Default number of consecutive update cycles before loop detection fires
pub const DEFAULT_LOOP_LIMIT: usize = 10;

/// Update handling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Consecutive self-triggered update cycles allowed (default: 10)
    #[serde(default = "default_loop_limit")]
    pub loop_limit: usize,

    /// Virtual duration of one animation frame (default: 16)
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

fn default_loop_limit() -> usize {
    DEFAULT_LOOP_LIMIT
}

fn default_frame_interval() -> u64 {
    DEFAULT_FRAME_INTERVAL_MS
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            loop_limit: default_loop_limit(),
            frame_interval_ms: default_frame_interval(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    update: UpdateConfig,
}

impl UpdateConfig {
    /// Parse the `[update]` table of a TOML document.
    ///
    /// A missing table or missing keys fall back to the defaults.
    pub fn from_toml_str(content: &str) -> ComponentResult<Self> {
        let document: ConfigDocument = toml::from_str(content)?;
        Ok(document.update)
    }

    /// Apply the frame interval to the event loop of this thread
    pub fn install(&self) {
        debug!(
            loop_limit = self.loop_limit,
            frame_interval_ms = self.frame_interval_ms,
            "installing update config"
        );
        EventLoop::set_frame_interval(self.frame_interval_ms);
    }
}
