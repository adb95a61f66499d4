use std::collections::VecDeque;
use std::time::Instant;

use lazy_static::lazy_static;
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::mock_data_generator::EegGenerator;
use crate::types::{AcquisitionSource, BoardDescriptor, DriverError, DriverStatus, SourceParams};
use eeg_types::SampleWindow;

// Identity of the one board allowed to hold a prepared session at a time
lazy_static! {
    static ref HARDWARE_IN_USE: Mutex<Option<String>> = Mutex::new(None);
}

/// An emulated board that reproduces a device's row layout and sample rate
/// without touching any hardware.
///
/// Samples are produced lazily: every read first generates whatever the board
/// would have streamed since the last read, so the ring buffer fills at the
/// device's real rate.
pub struct SyntheticBoard {
    descriptor: BoardDescriptor,
    identity: String,
    prefill_samples: u64,
    inner: Mutex<SyntheticInner>,
}

/// Internal state for the SyntheticBoard.
struct SyntheticInner {
    status: DriverStatus,
    generator: EegGenerator,
    started_at: Option<Instant>,
    // Total samples generated since the stream started
    produced: u64,
    buffer_size: usize,
    rows: Vec<VecDeque<f64>>,
}

impl SyntheticBoard {
    pub fn new(params: &SourceParams) -> Self {
        let descriptor = BoardDescriptor::for_device(params.device);
        let identity = params
            .address
            .clone()
            .unwrap_or_else(|| format!("{:?}", params.device).to_lowercase());
        let generator = EegGenerator::new(descriptor.sampling_rate, descriptor.eeg_channels.len());

        info!(
            "SyntheticBoard created for {:?} ({}) at {} Hz, timeout {:?}",
            params.device, identity, descriptor.sampling_rate, params.timeout
        );

        Self {
            inner: Mutex::new(SyntheticInner {
                status: DriverStatus::NotInitialized,
                generator,
                started_at: None,
                produced: 0,
                buffer_size: 0,
                rows: Vec::new(),
            }),
            descriptor,
            identity,
            prefill_samples: 0,
        }
    }

    /// Pretend the stream has already been running for `seconds` when it starts.
    pub fn with_prefill(mut self, seconds: f64) -> Self {
        self.prefill_samples = self.descriptor.samples_for(seconds.max(0.0)) as u64;
        self
    }

    fn expect_status(inner: &SyntheticInner, expected: DriverStatus) -> Result<(), DriverError> {
        if inner.status != expected {
            return Err(DriverError::InvalidState {
                expected,
                actual: inner.status,
            });
        }
        Ok(())
    }

    /// Generate everything streamed since the last read.
    fn pump(&self, inner: &mut SyntheticInner) {
        let Some(started_at) = inner.started_at else {
            return;
        };
        let elapsed = started_at.elapsed().as_secs_f64();
        let target = self.prefill_samples + (elapsed * self.descriptor.sampling_rate as f64) as u64;
        if target <= inner.produced {
            return;
        }

        // Anything older than the ring buffer would be discarded anyway.
        let capacity = inner.buffer_size as u64;
        if target - inner.produced > capacity {
            inner.produced = target - capacity;
        }

        while inner.produced < target {
            let counter = (inner.produced % 256) as f64;
            for (row_idx, row) in inner.rows.iter_mut().enumerate() {
                let value = if row_idx == self.descriptor.package_row {
                    counter
                } else if let Some(ch) = self.descriptor.eeg_channels.iter().position(|&c| c == row_idx) {
                    inner.generator.next_sample(ch)
                } else {
                    0.0
                };
                row.push_back(value);
                if row.len() > inner.buffer_size {
                    row.pop_front();
                }
            }
            inner.produced += 1;
        }
    }

    fn release_hardware(&self) {
        HARDWARE_IN_USE.lock().take();
    }
}

impl AcquisitionSource for SyntheticBoard {
    fn descriptor(&self) -> &BoardDescriptor {
        &self.descriptor
    }

    fn prepare_session(&self) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        Self::expect_status(&inner, DriverStatus::NotInitialized)?;

        {
            let mut holder = HARDWARE_IN_USE.lock();
            if let Some(holder) = holder.as_deref() {
                return Err(DriverError::HardwareNotFound(format!(
                    "cannot prepare board '{}': hardware is held by board '{}'",
                    self.identity, holder
                )));
            }
            *holder = Some(self.identity.clone());
        }

        inner.status = DriverStatus::Prepared;
        debug!("SyntheticBoard '{}' session prepared", self.identity);
        Ok(())
    }

    fn start_stream(&self, buffer_size: usize) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        Self::expect_status(&inner, DriverStatus::Prepared)?;
        if buffer_size == 0 {
            return Err(DriverError::ConfigurationError(
                "stream buffer size must be positive".to_string(),
            ));
        }

        inner.buffer_size = buffer_size;
        inner.rows = vec![VecDeque::new(); self.descriptor.row_count];
        inner.produced = 0;
        inner.started_at = Some(Instant::now());
        inner.status = DriverStatus::Running;
        info!("SyntheticBoard '{}' streaming", self.identity);
        Ok(())
    }

    fn current_window(&self, sample_count: usize) -> Result<SampleWindow, DriverError> {
        let mut inner = self.inner.lock();
        Self::expect_status(&inner, DriverStatus::Running)?;
        self.pump(&mut inner);

        let rows = inner
            .rows
            .iter()
            .map(|row| {
                let take = sample_count.min(row.len());
                row.range(row.len() - take..).copied().collect()
            })
            .collect();
        Ok(SampleWindow::new(rows))
    }

    fn stop_stream(&self) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        Self::expect_status(&inner, DriverStatus::Running)?;
        inner.status = DriverStatus::Prepared;
        inner.started_at = None;
        info!("SyntheticBoard '{}' stream stopped", self.identity);
        Ok(())
    }

    fn release_session(&self) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        if inner.status == DriverStatus::NotInitialized {
            return Ok(());
        }
        inner.status = DriverStatus::NotInitialized;
        inner.started_at = None;
        inner.rows.clear();
        self.release_hardware();
        info!("SyntheticBoard '{}' session released", self.identity);
        Ok(())
    }

    fn status(&self) -> DriverStatus {
        self.inner.lock().status
    }
}

impl Drop for SyntheticBoard {
    fn drop(&mut self) {
        if self.status() != DriverStatus::NotInitialized {
            warn!("SyntheticBoard '{}' dropped without releasing its session.", self.identity);
            let _ = self.release_session();
        }
    }
}
