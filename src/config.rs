use crate::warn;
use std::{env, str::FromStr, time::Duration};

/// Timing and batching knobs of the parameter synchronization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Wait after each "request all" broadcast before completeness is evaluated.
    pub settle_window: Duration,
    /// Wait after a round of individual re-requests.
    pub retry_wait: Duration,
    /// Upper bound on evaluation rounds after the initial settle window.
    pub max_rounds: usize,
    /// Number of indices requested back-to-back before pausing.
    pub batch_size: usize,
    /// Pause between two batches of individual requests.
    pub batch_spacing: Duration,
    /// Deadline for the echo of a single write.
    pub write_timeout: Duration,
    /// Deadline for the answer to a single read.
    pub read_timeout: Duration,
}

impl SyncConfig {
    const SETTLE_WINDOW: Duration = Duration::from_secs(3);
    const RETRY_WAIT: Duration = Duration::from_secs(2);
    const MAX_ROUNDS: usize = 10;
    const BATCH_SIZE: usize = 5;
    const BATCH_SPACING: Duration = Duration::from_millis(200);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(3);
    const READ_TIMEOUT: Duration = Duration::from_secs(3);

    /// Builds the default configuration and applies `SENSOR_CAL_SYNC_*` overrides.
    ///
    /// Durations are read in milliseconds, counts as plain integers.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        override_ms("SENSOR_CAL_SYNC_SETTLE_MS", &mut cfg.settle_window);
        override_ms("SENSOR_CAL_SYNC_RETRY_WAIT_MS", &mut cfg.retry_wait);
        override_val("SENSOR_CAL_SYNC_MAX_ROUNDS", &mut cfg.max_rounds);
        override_val("SENSOR_CAL_SYNC_BATCH_SIZE", &mut cfg.batch_size);
        override_ms("SENSOR_CAL_SYNC_BATCH_SPACING_MS", &mut cfg.batch_spacing);
        override_ms("SENSOR_CAL_WRITE_TIMEOUT_MS", &mut cfg.write_timeout);
        override_ms("SENSOR_CAL_READ_TIMEOUT_MS", &mut cfg.read_timeout);
        cfg.batch_size = cfg.batch_size.max(1);
        cfg
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_window: Self::SETTLE_WINDOW,
            retry_wait: Self::RETRY_WAIT,
            max_rounds: Self::MAX_ROUNDS,
            batch_size: Self::BATCH_SIZE,
            batch_spacing: Self::BATCH_SPACING,
            write_timeout: Self::WRITE_TIMEOUT,
            read_timeout: Self::READ_TIMEOUT,
        }
    }
}

/// Thresholds of the calibration abort supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Period of the condition check.
    pub tick: Duration,
    /// Maximum heartbeat age before the link is considered lost.
    pub heartbeat_timeout: Duration,
    /// Maximum duration of one calibration.
    pub session_timeout: Duration,
    /// Maximum time the user may take to reach a requested accelerometer position.
    pub position_timeout: Duration,
}

impl MonitorConfig {
    const TICK: Duration = Duration::from_millis(500);
    const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(5000);
    const SESSION_TIMEOUT: Duration = Duration::from_millis(300_000);
    const POSITION_TIMEOUT: Duration = Duration::from_millis(60_000);

    /// Builds the default configuration and applies `SENSOR_CAL_MONITOR_*` overrides (milliseconds).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        override_ms("SENSOR_CAL_MONITOR_TICK_MS", &mut cfg.tick);
        override_ms("SENSOR_CAL_MONITOR_HEARTBEAT_MS", &mut cfg.heartbeat_timeout);
        override_ms("SENSOR_CAL_MONITOR_SESSION_MS", &mut cfg.session_timeout);
        override_ms("SENSOR_CAL_MONITOR_POSITION_MS", &mut cfg.position_timeout);
        cfg
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick: Self::TICK,
            heartbeat_timeout: Self::HEARTBEAT_TIMEOUT,
            session_timeout: Self::SESSION_TIMEOUT,
            position_timeout: Self::POSITION_TIMEOUT,
        }
    }
}

fn override_val<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!("Ignoring unparsable value '{raw}' for {key}."),
        }
    }
}

fn override_ms(key: &str, slot: &mut Duration) {
    let mut ms = u64::try_from(slot.as_millis()).unwrap_or(u64::MAX);
    override_val(key, &mut ms);
    *slot = Duration::from_millis(ms);
}
