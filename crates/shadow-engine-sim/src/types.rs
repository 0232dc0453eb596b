//! Simulation profile.

use std::time::Duration;

use shadow_torrent_core::EngineCapabilities;

/// Knobs controlling how the simulated engine advances transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimProfile {
    /// Worker tick.
    pub tick: Duration,
    /// Bytes downloaded per tick before rate limits apply.
    pub bytes_per_tick: u64,
    /// Total size given to every new transfer.
    pub default_size: u64,
    /// Capabilities the engine declares.
    pub capabilities: EngineCapabilities,
    /// Create sparse content files on completion.
    pub materialize_files: bool,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            bytes_per_tick: 256 * 1024,
            default_size: 8 * 1024 * 1024,
            capabilities: EngineCapabilities::full(),
            materialize_files: true,
        }
    }
}

impl SimProfile {
    /// Fast profile for tests: small transfers that finish in a few ticks.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            tick: Duration::from_millis(10),
            bytes_per_tick: 512,
            default_size: 2_048,
            ..Self::default()
        }
    }
}
