//! One-shot multi-channel ADC scan.
//!
//! A scan runs in fixed steps against the register port:
//!
//! 1. **Configure**: write the reduction factor, read back start/end channel
//!    and oversample count, derive a [`ScanConfig`].
//! 2. **Prime**: disable and clear the trigger, then select software start.
//! 3. **Drain**: discard anything left in the FIFO.
//! 4. **Trigger**: strobe software start and let the converter settle.
//! 5. **Acquire**: poll the FIFO until `channels * (N + 1)` valid samples
//!    arrived or the timeout passes.
//! 6. **Bucket** and **reduce** the samples per channel into [`ScanReadings`].
//!
//! Reduction per channel with oversample count `N`:
//!
//! | N | result |
//! |---|--------|
//! | 0 | the single sample |
//! | 1 | rounded mean of both samples |
//! | >1 | first sample discarded, rounded mean of the remaining N |
//!
//! Rounding is to nearest with ties up.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aiod_core::registers::{self, sample};
use aiod_core::RegisterPort;
use tracing::{debug, warn};

use crate::arbiter::AdcArbiter;
use crate::error::{AcquisitionError, Result};

/// Upper bound on drain rounds before a scan gives up on an ever-filling FIFO.
const MAX_DRAIN_ROUNDS: usize = 64;

/// Timing and reduction knobs for scans.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Value written to the ADC reduction register before each scan
    pub reduction_factor: u8,
    /// Delay after the start strobe
    pub settle: Duration,
    /// Sleep between FIFO polls
    pub poll_interval: Duration,
    /// Fixed part of the acquisition timeout
    pub timeout_floor: Duration,
    /// Timeout allowance per expected sample
    pub timeout_per_sample: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            reduction_factor: 0,
            settle: Duration::from_micros(10),
            poll_interval: Duration::from_micros(50),
            timeout_floor: Duration::from_millis(100),
            timeout_per_sample: Duration::from_micros(20),
        }
    }
}

impl ScanSettings {
    /// Acquisition timeout for `expected` samples.
    pub fn timeout_for(&self, expected: usize) -> Duration {
        let per_sample = u32::try_from(expected).unwrap_or(u32::MAX);
        self.timeout_floor + self.timeout_per_sample.saturating_mul(per_sample)
    }
}

/// Channel range and oversampling of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    start: u8,
    end: u8,
    oversample: u8,
}

impl ScanConfig {
    /// Validate `end >= start`.
    pub fn new(start: u8, end: u8, oversample: u8) -> Result<Self> {
        if end < start {
            return Err(AcquisitionError::InvalidScanConfig { start, end });
        }
        Ok(Self {
            start,
            end,
            oversample,
        })
    }

    /// First channel.
    pub fn start(&self) -> u8 {
        self.start
    }

    /// Last channel, inclusive.
    pub fn end(&self) -> u8 {
        self.end
    }

    /// Oversample count `N`.
    pub fn oversample(&self) -> u8 {
        self.oversample
    }

    /// Channels in the inclusive range.
    pub fn channel_count(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Samples expected per channel (`N + 1`).
    pub fn per_channel(&self) -> usize {
        usize::from(self.oversample) + 1
    }

    /// Samples expected in total.
    pub fn total_samples(&self) -> usize {
        self.channel_count() * self.per_channel()
    }

    /// Whether `channel` belongs to this scan.
    pub fn contains(&self, channel: u8) -> bool {
        (self.start..=self.end).contains(&channel)
    }
}

/// Running state of one channel while bucketing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelAccumulator {
    sum: u64,
    seen: usize,
    included: usize,
    first: Option<u16>,
    metadata: Option<u32>,
}

impl ChannelAccumulator {
    /// Add one raw sample. Samples beyond `N + 1` are ignored.
    pub fn push(&mut self, raw: u32, oversample: u8) {
        let cap = usize::from(oversample) + 1;
        if self.seen >= cap {
            return;
        }
        let count = sample::count(raw);
        self.seen += 1;
        if self.first.is_none() {
            self.first = Some(count);
            self.metadata = Some(sample::metadata(raw));
        }
        // With more than one oversample the first conversion is dropped.
        if oversample > 1 && self.seen == 1 {
            return;
        }
        self.sum += u64::from(count);
        self.included += 1;
    }

    /// Samples accepted so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Reduced count, or `None` if the channel produced nothing.
    pub fn reduce(&self) -> Option<u16> {
        match self.included {
            0 => self.first,
            n => {
                let n = n as u64;
                Some(((self.sum + n / 2) / n) as u16)
            }
        }
    }

    /// Metadata bits of the first sample, if any.
    pub fn metadata(&self) -> Option<u32> {
        self.metadata
    }
}

/// Reduced result of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelReading {
    /// Channel number
    pub channel: u8,
    /// Reduced count (0 when no data)
    pub count: u16,
    /// Hardware metadata bits, `None` when the channel produced no data
    pub metadata: Option<u32>,
}

impl ChannelReading {
    /// Raw view: metadata | count, or the no-data sentinel.
    pub fn raw(&self) -> u32 {
        match self.metadata {
            Some(metadata) => metadata | u32::from(self.count),
            None => sample::NO_DATA,
        }
    }

    /// Volts view, NaN when no data.
    pub fn volts(&self) -> f32 {
        sample::to_volts(self.raw()) as f32
    }
}

/// Per-channel results of a scan, ordered by channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReadings {
    config: ScanConfig,
    channels: Vec<ChannelReading>,
}

impl ScanReadings {
    /// Bucket `samples` by channel and reduce.
    ///
    /// Samples of channels outside the configured range never contribute.
    pub fn from_samples(config: ScanConfig, samples: &[u32]) -> Self {
        let mut buckets = vec![ChannelAccumulator::default(); config.channel_count()];
        let mut stray = 0usize;
        for &raw in samples {
            let channel = sample::channel(raw);
            if !config.contains(channel) {
                stray += 1;
                continue;
            }
            buckets[usize::from(channel - config.start)].push(raw, config.oversample);
        }
        if stray > 0 {
            warn!(stray, "Discarded samples outside the scan range");
        }

        let channels = buckets
            .iter()
            .zip(config.start..=config.end)
            .map(|(acc, channel)| ChannelReading {
                channel,
                count: acc.reduce().unwrap_or(0),
                metadata: acc.metadata(),
            })
            .collect();
        Self { config, channels }
    }

    /// Configuration the scan ran with.
    pub fn config(&self) -> ScanConfig {
        self.config
    }

    /// One reading per channel, in channel order.
    pub fn channels(&self) -> &[ChannelReading] {
        &self.channels
    }

    /// Raw view of every channel.
    pub fn raw(&self) -> Vec<u32> {
        self.channels.iter().map(ChannelReading::raw).collect()
    }

    /// Counts view of every channel.
    pub fn counts(&self) -> Vec<u16> {
        self.channels.iter().map(|c| c.count).collect()
    }

    /// Volts view of every channel.
    pub fn volts(&self) -> Vec<f32> {
        self.channels.iter().map(ChannelReading::volts).collect()
    }
}

/// Runs scans against a register port.
#[derive(Debug, Clone)]
pub struct ScanEngine {
    settings: ScanSettings,
    arbiter: Arc<AdcArbiter>,
}

impl ScanEngine {
    /// Engine sharing `arbiter` with the streaming session.
    pub fn new(settings: ScanSettings, arbiter: Arc<AdcArbiter>) -> Self {
        Self { settings, arbiter }
    }

    /// Configured settings.
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Run one complete scan.
    ///
    /// Fails with [`AcquisitionError::AdcBusy`] while a streaming session
    /// holds the ADC. On timeout no partial result is returned.
    pub fn scan(&self, port: &dyn RegisterPort) -> Result<ScanReadings> {
        let _claim = self.arbiter.begin_scan()?;

        let config = self.configure(port)?;
        self.prime(port)?;
        let drained = drain_fifo(port)?;
        if drained > 0 {
            debug!(drained, "Discarded stale FIFO samples");
        }

        port.write(registers::OFS_ADC_SOFTWARE_START, 1)?;
        thread::sleep(self.settings.settle);

        let samples = self.acquire(port, config.total_samples())?;
        let readings = ScanReadings::from_samples(config, &samples);
        debug!(
            start = config.start,
            end = config.end,
            oversample = config.oversample,
            samples = samples.len(),
            "Scan complete"
        );
        Ok(readings)
    }

    fn configure(&self, port: &dyn RegisterPort) -> Result<ScanConfig> {
        port.write(
            registers::OFS_ADC_REDUCTION,
            u32::from(self.settings.reduction_factor),
        )?;
        let start = port.read(registers::OFS_ADC_START_CHANNEL)? as u8;
        let end = port.read(registers::OFS_ADC_END_CHANNEL)? as u8;
        let oversample = port.read(registers::OFS_ADC_OVERSAMPLES)? as u8;
        ScanConfig::new(start, end, oversample)
    }

    fn prime(&self, port: &dyn RegisterPort) -> Result<()> {
        port.write(registers::OFS_ADC_TRIGGER, registers::TRIGGER_DISABLED)?;
        port.write(registers::OFS_ADC_TRIGGER, registers::TRIGGER_CLEAR)?;
        port.write(registers::OFS_ADC_TRIGGER, registers::TRIGGER_SOFTWARE)?;
        Ok(())
    }

    fn acquire(&self, port: &dyn RegisterPort, expected: usize) -> Result<Vec<u32>> {
        let timeout = self.settings.timeout_for(expected);
        let started = Instant::now();
        let mut samples = Vec::with_capacity(expected);

        while samples.len() < expected {
            let available = port.read(registers::OFS_ADC_FIFO_COUNT)? as usize;
            for _ in 0..available.min(expected - samples.len()) {
                let raw = port.read(registers::OFS_ADC_FIFO_DATA)?;
                if !sample::is_invalid(raw) {
                    samples.push(raw);
                }
            }
            if samples.len() >= expected {
                break;
            }

            // Every pass, even while the FIFO still reports words
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(AcquisitionError::ScanTimeout {
                    expected,
                    received: samples.len(),
                    elapsed,
                });
            }
            if available == 0 {
                thread::sleep(self.settings.poll_interval);
            }
        }
        Ok(samples)
    }
}

fn drain_fifo(port: &dyn RegisterPort) -> Result<usize> {
    let mut drained = 0usize;
    for _ in 0..MAX_DRAIN_ROUNDS {
        let pending = port.read(registers::OFS_ADC_FIFO_COUNT)? as usize;
        if pending == 0 {
            break;
        }
        for _ in 0..pending {
            port.read(registers::OFS_ADC_FIFO_DATA)?;
        }
        drained += pending;
    }
    Ok(drained)
}
