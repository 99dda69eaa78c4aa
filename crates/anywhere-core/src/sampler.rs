//! Traffic counter polling and rate computation
//!
//! While a session is connected a background task polls the backend's
//! cumulative counters on a fixed interval, differentiates them into bytes
//! per second and publishes the latest reading on a watch channel. The task
//! is tied to a cancellation token and stops as soon as the session leaves
//! the connected state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backend::{TrafficCounters, VpnBackend};
use crate::clock::Clock;
use crate::registry::TunnelHandle;

const KIB: f64 = 1024.0;

/// Shortest polling interval accepted; `interval` panics on zero
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Cumulative counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSample {
    pub total_rx: u64,
    pub total_tx: u64,
    pub timestamp_ms: u64,
}

/// Display unit for a byte rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RateUnit {
    BytesPerSec,
    KiloBytesPerSec,
    MegaBytesPerSec,
    GigaBytesPerSec,
    TeraBytesPerSec,
}

impl RateUnit {
    const LADDER: [RateUnit; 5] = [
        RateUnit::BytesPerSec,
        RateUnit::KiloBytesPerSec,
        RateUnit::MegaBytesPerSec,
        RateUnit::GigaBytesPerSec,
        RateUnit::TeraBytesPerSec,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RateUnit::BytesPerSec => "B/s",
            RateUnit::KiloBytesPerSec => "KB/s",
            RateUnit::MegaBytesPerSec => "MB/s",
            RateUnit::GigaBytesPerSec => "GB/s",
            RateUnit::TeraBytesPerSec => "TB/s",
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rate scaled to the largest binary unit that keeps the value >= 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ByteRate {
    pub value: f64,
    pub unit: RateUnit,
}

impl ByteRate {
    pub fn from_bytes_per_sec(bytes_per_sec: f64) -> Self {
        let mut value = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
            bytes_per_sec
        } else {
            0.0
        };

        let mut step = 0;
        while value >= KIB && step < RateUnit::LADDER.len() - 1 {
            value /= KIB;
            step += 1;
        }

        Self {
            value,
            unit: RateUnit::LADDER[step],
        }
    }
}

impl fmt::Display for ByteRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.unit)
    }
}

/// Raw per-direction rates between two samples
///
/// `None` when no time has passed. A counter that went backwards (backend
/// reset) yields zero for that direction.
pub fn compute_rate(previous: &TrafficSample, current: &TrafficSample) -> Option<(f64, f64)> {
    let elapsed_ms = current.timestamp_ms.saturating_sub(previous.timestamp_ms);
    if elapsed_ms == 0 {
        return None;
    }

    let secs = elapsed_ms as f64 / 1000.0;
    let rx = current.total_rx.saturating_sub(previous.total_rx) as f64 / secs;
    let tx = current.total_tx.saturating_sub(previous.total_tx) as f64 / secs;
    Some((rx, tx))
}

/// Latest published rate for a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateReading {
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
    pub totals: TrafficCounters,
    pub timestamp_ms: u64,
}

impl RateReading {
    pub fn rx(&self) -> ByteRate {
        ByteRate::from_bytes_per_sec(self.rx_bytes_per_sec)
    }

    pub fn tx(&self) -> ByteRate {
        ByteRate::from_bytes_per_sec(self.tx_bytes_per_sec)
    }
}

/// Turns a stream of samples into smoothed readings
#[derive(Debug, Clone)]
pub struct RateTracker {
    alpha: f64,
    last: Option<TrafficSample>,
    smoothed: Option<(f64, f64)>,
}

impl RateTracker {
    /// `alpha` is the EMA weight of the newest rate; 1.0 means no smoothing
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            1.0
        };

        Self {
            alpha,
            last: None,
            smoothed: None,
        }
    }

    /// Feed a sample; the first sample only primes the tracker
    pub fn observe(&mut self, sample: TrafficSample) -> Option<RateReading> {
        let previous = self.last.replace(sample)?;
        let (rx, tx) = compute_rate(&previous, &sample)?;

        let (rx, tx) = match self.smoothed {
            Some((prev_rx, prev_tx)) => (
                self.alpha * rx + (1.0 - self.alpha) * prev_rx,
                self.alpha * tx + (1.0 - self.alpha) * prev_tx,
            ),
            None => (rx, tx),
        };
        self.smoothed = Some((rx, tx));

        Some(RateReading {
            rx_bytes_per_sec: rx,
            tx_bytes_per_sec: tx,
            totals: TrafficCounters {
                total_rx: sample.total_rx,
                total_tx: sample.total_tx,
            },
            timestamp_ms: sample.timestamp_ms,
        })
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.smoothed = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub interval: Duration,
    pub smoothing: f64,
}

/// Per-tunnel background polling tasks
pub struct StatisticsSampler {
    config: SamplerConfig,
    backend: Arc<dyn VpnBackend>,
    clock: Arc<dyn Clock>,
    root: CancellationToken,
    active: DashMap<String, CancellationToken>,
    channels: DashMap<String, watch::Sender<Option<RateReading>>>,
}

impl StatisticsSampler {
    pub fn new(
        mut config: SamplerConfig,
        backend: Arc<dyn VpnBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if config.interval < MIN_INTERVAL {
            tracing::warn!(
                "Sample interval {:?} is too short, using {:?}",
                config.interval,
                MIN_INTERVAL
            );
            config.interval = MIN_INTERVAL;
        }

        Self {
            config,
            backend,
            clock,
            root: CancellationToken::new(),
            active: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Start (or restart) polling for `handle`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, handle: Arc<TunnelHandle>) {
        let name = handle.name().to_string();
        self.stop(&name);

        let token = self.root.child_token();
        let readings = self.channel(&name);

        tokio::spawn(run_sampler(
            self.backend.clone(),
            self.clock.clone(),
            handle,
            self.config,
            token.clone(),
            readings,
        ));

        self.active.insert(name, token);
    }

    /// Stop polling for `name` and clear its published reading
    ///
    /// No reading is published for `name` after this returns.
    pub fn stop(&self, name: &str) {
        if let Some((_, token)) = self.active.remove(name) {
            token.cancel();
            tracing::debug!("Stopped sampler for {}", name);
        }
        if let Some(readings) = self.channels.get(name) {
            readings.send_replace(None);
        }
    }

    pub fn stop_all(&self) {
        let names: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.stop(&name);
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Follow readings for `name`; `None` while not sampling
    pub fn subscribe(&self, name: &str) -> watch::Receiver<Option<RateReading>> {
        self.channel(name).subscribe()
    }

    pub fn latest(&self, name: &str) -> Option<RateReading> {
        let readings = self.channels.get(name)?;
        let latest = *readings.borrow();
        latest
    }

    fn channel(&self, name: &str) -> watch::Sender<Option<RateReading>> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .value()
            .clone()
    }
}

impl Drop for StatisticsSampler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run_sampler(
    backend: Arc<dyn VpnBackend>,
    clock: Arc<dyn Clock>,
    handle: Arc<TunnelHandle>,
    config: SamplerConfig,
    token: CancellationToken,
    readings: watch::Sender<Option<RateReading>>,
) {
    let mut tracker = RateTracker::new(config.smoothing);
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!("Sampler started for {}", handle.name());

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let poll = {
            let backend = backend.clone();
            let handle = handle.clone();
            tokio::task::spawn_blocking(move || backend.statistics(&handle))
        };

        let counters = tokio::select! {
            _ = token.cancelled() => break,
            result = poll => result,
        };

        let counters = match counters {
            Ok(Ok(counters)) => counters,
            Ok(Err(e)) => {
                tracing::debug!("Statistics poll for {} failed: {}", handle.name(), e);
                continue;
            }
            Err(e) => {
                tracing::warn!("Statistics worker for {} panicked: {}", handle.name(), e);
                continue;
            }
        };

        let sample = TrafficSample {
            total_rx: counters.total_rx,
            total_tx: counters.total_tx,
            timestamp_ms: clock.now_ms(),
        };

        if let Some(reading) = tracker.observe(sample) {
            // The check runs under the channel lock, so it cannot interleave
            // with the `None` written by `stop`.
            readings.send_if_modified(|slot| {
                if token.is_cancelled() {
                    return false;
                }
                *slot = Some(reading);
                true
            });
        }
    }

    tracing::debug!("Sampler exited for {}", handle.name());
}
