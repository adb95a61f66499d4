//! Session state shared between the controller, the streaming loop and
//! calibration runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use band_power::RawMetrics;
use eeg_types::{
    default_baselines, Baselines, ChannelMap, ConnectionState, MetricMode, RegionMap, Settings,
    SettingsError, SettingsUpdate,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::smoothing::update_ema;

/// Live state of the single acquisition session this process drives.
///
/// Created once at startup and handed out as `Arc<SessionState>`. Tunables can
/// change at any time and are read fresh every cycle; the channel map and the
/// baselines are always replaced as whole pairs so readers never see half an
/// update.
pub struct SessionState {
    connection: RwLock<ConnectionState>,
    calibrating: AtomicBool,
    settings: RwLock<Settings>,
    channel_map: RwLock<Option<Arc<ChannelMap>>>,
    baselines: RwLock<Baselines>,
    ema: Mutex<RegionMap<f64>>,
}

/// Point-in-time view of the session, served on `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub calibrating: bool,
    pub settings: Settings,
    pub baselines: Baselines,
    pub smoothed: RegionMap<f64>,
    pub channel_map: Option<ChannelMap>,
}

impl SessionState {
    pub fn new(settings: Settings) -> Self {
        Self {
            connection: RwLock::new(ConnectionState::Idle),
            calibrating: AtomicBool::new(false),
            settings: RwLock::new(settings),
            channel_map: RwLock::new(None),
            baselines: RwLock::new(default_baselines()),
            ema: Mutex::new(RegionMap::default()),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        *self.connection.read()
    }

    pub fn is_streaming(&self) -> bool {
        self.connection() == ConnectionState::Streaming
    }

    pub fn set_connection(&self, state: ConnectionState) {
        *self.connection.write() = state;
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::Acquire)
    }

    /// Enter calibration. Fails when not streaming or when a run is already active.
    pub fn try_begin_calibration(&self) -> bool {
        if !self.is_streaming() {
            return false;
        }
        self.calibrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_calibration(&self) {
        self.calibrating.store(false, Ordering::Release);
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn metric_mode(&self) -> MetricMode {
        self.settings.read().metric_mode
    }

    pub fn smoothing_factor(&self) -> f64 {
        self.settings.read().smoothing_factor
    }

    pub fn sensitivity(&self) -> f64 {
        self.settings.read().sensitivity
    }

    /// Binding for a region, lowercased and trimmed.
    pub fn key_binding(&self, region: eeg_types::Region) -> String {
        self.settings.read().key_bindings[region].trim().to_lowercase()
    }

    pub fn apply_settings(&self, update: SettingsUpdate) -> Result<(), SettingsError> {
        self.settings.write().apply(update)
    }

    pub fn channel_map(&self) -> Option<Arc<ChannelMap>> {
        self.channel_map.read().clone()
    }

    pub fn set_channel_map(&self, map: ChannelMap) {
        *self.channel_map.write() = Some(Arc::new(map));
    }

    pub fn baselines(&self) -> Baselines {
        *self.baselines.read()
    }

    pub fn set_baselines(&self, baselines: Baselines) {
        *self.baselines.write() = baselines;
    }

    pub fn smoothed(&self) -> RegionMap<f64> {
        *self.ema.lock()
    }

    /// Fold one cycle of raw metrics into the EMA state and return the new
    /// smoothed pair. Regions without a raw value keep their previous state.
    pub fn update_smoothed(&self, raw: &RawMetrics, factor: f64) -> RegionMap<f64> {
        let mut ema = self.ema.lock();
        for (region, value) in raw.iter() {
            if let Some(value) = value {
                ema[region] = update_ema(ema[region], *value, factor);
            }
        }
        *ema
    }

    /// Clear per-stream state before a new stream starts.
    pub fn reset_for_stream_start(&self) {
        *self.ema.lock() = RegionMap::default();
        *self.channel_map.write() = None;
    }

    /// Return to idle after a stream stopped or failed to start.
    pub fn reset_after_stop(&self) {
        self.set_connection(ConnectionState::Idle);
        *self.channel_map.write() = None;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection(),
            calibrating: self.is_calibrating(),
            settings: self.settings(),
            baselines: self.baselines(),
            smoothed: self.smoothed(),
            channel_map: self.channel_map().map(|map| (*map).clone()),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
