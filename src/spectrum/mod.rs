/*
 *  spectrum/mod.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Spectral event pipeline: buckets, history, normalization, events and colour gains
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

pub mod events;
pub mod history;
pub mod transform;

use bitflags::bitflags;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use events::{AmplitudeEvent, AmplitudeState, BinStats, EventConfig, EventDetector, Hysteresis, TrackedState};
pub use history::BinHistory;
pub use transform::{BucketMap, RustFftTransform, SpectralTransform, DEFAULT_BUCKET_EDGES};

/// Upper bound of normalized values
pub const FULL_SCALE: f64 = 100.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpectrumError {
    #[error("sample block holds {actual} samples, transform needs {expected}")]
    SampleCount { expected: usize, actual: usize },

    #[error("display depth {depth} exceeds history depth {total}")]
    DisplayDepth { depth: usize, total: usize },

    #[error("bucket layout: {0}")]
    Buckets(String),

    #[error("transform: {0}")]
    Transform(String),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NormalizeOptions: u8 {
        const LOGARITHMIC = 0b001;
        const AUTOSCALE   = 0b010;
        const SIGMOID     = 0b100;
    }
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::all()
    }
}

/// Logistic curve parameters, output approaches `numerator / (numerator / FULL_SCALE)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigmoidParams {
    pub numerator: f64,
    pub offset: f64,
    pub slope: f64,
}

impl Default for SigmoidParams {
    fn default() -> Self {
        Self { numerator: 100.0, offset: 50.0, slope: 10.0 }
    }
}

impl SigmoidParams {
    pub fn apply(&self, value: f64) -> f64 {
        let constant = self.numerator / FULL_SCALE;
        self.numerator / (constant + (-(value - self.offset) / self.slope).exp())
    }
}

/// Spectrum configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// log2 of the transform size
    pub fft_log: u32,
    pub sample_rate: u32,
    pub bin_count: usize,
    /// Retained history used for normalization
    pub total_depth: usize,
    /// Newest rows that are scaled and shown
    pub display_depth: usize,
    /// Explicit bucket edges in Hz, `bin_count + 1` values
    pub bucket_edges: Option<Vec<f32>>,
    pub logarithmic: bool,
    pub autoscale: bool,
    pub sigmoid: bool,
    pub sigmoid_params: SigmoidParams,
    pub events: EventConfig,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_log: 9,
            sample_rate: 11025,
            bin_count: 16,
            total_depth: 64,
            display_depth: 8,
            bucket_edges: None,
            logarithmic: true,
            autoscale: true,
            sigmoid: true,
            sigmoid_params: SigmoidParams::default(),
            events: EventConfig::default(),
        }
    }
}

impl SpectrumConfig {
    pub fn block_size(&self) -> usize {
        1 << self.fft_log
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        let mut options = NormalizeOptions::empty();
        options.set(NormalizeOptions::LOGARITHMIC, self.logarithmic);
        options.set(NormalizeOptions::AUTOSCALE, self.autoscale);
        options.set(NormalizeOptions::SIGMOID, self.sigmoid);
        options
    }

    /// Explicit edges, the default layout for 16 buckets, otherwise log spaced
    pub fn edges(&self) -> Vec<f32> {
        match &self.bucket_edges {
            Some(edges) => edges.clone(),
            None if self.bin_count == DEFAULT_BUCKET_EDGES.len() - 1 => DEFAULT_BUCKET_EDGES.to_vec(),
            None => transform::log_bucket_edges(self.bin_count, self.sample_rate),
        }
    }

    pub fn validate(&self) -> Result<(), SpectrumError> {
        if self.bin_count == 0 {
            return Err(SpectrumError::Buckets("bin_count must be at least 1".into()));
        }
        let edges = self.edges();
        if edges.len() != self.bin_count + 1 {
            return Err(SpectrumError::Buckets(format!(
                "{} buckets need {} edges, {} configured", self.bin_count, self.bin_count + 1, edges.len()
            )));
        }
        if self.display_depth == 0 || self.display_depth > self.total_depth {
            return Err(SpectrumError::DisplayDepth { depth: self.display_depth, total: self.total_depth });
        }
        if self.sigmoid && self.sigmoid_params.slope == 0.0 {
            return Err(SpectrumError::Buckets("sigmoid slope must be non-zero".into()));
        }
        Ok(())
    }
}

/// Red, green and blue intensity multipliers in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorGains {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

/// Turns raw sample blocks into a normalized bucket history, a debounced
/// amplitude event and colour gains
pub struct SpectrumProcessor {
    config: SpectrumConfig,
    options: NormalizeOptions,
    transform: Box<dyn SpectralTransform>,
    buckets: BucketMap,
    raw: BinHistory,
    normalized: BinHistory,
    detector: EventDetector,
    stats: BinStats,
    gains: ColorGains,
    event: AmplitudeEvent,
}

impl SpectrumProcessor {
    pub fn new(config: SpectrumConfig) -> Result<Self, SpectrumError> {
        let transform = RustFftTransform::new(config.fft_log)?;
        Self::with_transform(config, Box::new(transform))
    }

    pub fn with_transform(config: SpectrumConfig, transform: Box<dyn SpectralTransform>) -> Result<Self, SpectrumError> {
        config.validate()?;
        let buckets = BucketMap::new(&config.edges(), transform.size(), config.sample_rate)?;
        let empty = buckets.empty_buckets();
        if !empty.is_empty() {
            warn!("buckets {:?} are narrower than one transform bin and stay at zero", empty);
        }
        debug!(
            "spectrum: {} point transform at {} Hz, {} buckets, history {}/{}",
            transform.size(), config.sample_rate, config.bin_count, config.display_depth, config.total_depth
        );

        Ok(Self {
            options: config.normalize_options(),
            raw: BinHistory::new(config.total_depth, config.bin_count),
            normalized: BinHistory::new(config.total_depth, config.bin_count),
            detector: EventDetector::new(config.events.clone()),
            stats: BinStats::default(),
            gains: ColorGains::default(),
            event: AmplitudeEvent::None,
            config,
            transform,
            buckets,
        })
    }

    pub fn config(&self) -> &SpectrumConfig { &self.config }
    pub fn block_size(&self) -> usize { self.transform.size() }
    pub fn raw(&self) -> &BinHistory { &self.raw }
    pub fn normalized(&self) -> &BinHistory { &self.normalized }
    pub fn stats(&self) -> BinStats { self.stats }
    pub fn detector(&self) -> &EventDetector { &self.detector }

    /// One pipeline step for a new sample block taken at `seconds`
    pub fn cycle(&mut self, samples: &[i16], display_depth: usize, seconds: f64) -> Result<&BinHistory, SpectrumError> {
        if display_depth == 0 || display_depth > self.config.total_depth {
            return Err(SpectrumError::DisplayDepth { depth: display_depth, total: self.config.total_depth });
        }
        // history only moves once the new block has been transformed
        let spectrum = self.transform.process(samples)?;
        self.raw.archive();
        self.buckets.reduce(spectrum, self.raw.row_mut(0));
        self.normalize(display_depth);
        let stats = self.analyze();

        let event = self.detector.update(&stats, seconds);
        if event != AmplitudeEvent::None {
            self.event = event;
        }
        self.gains = self.compute_gains(display_depth);
        Ok(&self.normalized)
    }

    pub fn archive(&mut self) {
        self.raw.archive();
    }

    /// Transform `samples` and write the bucket maxima to raw row 0
    pub fn extract(&mut self, samples: &[i16]) -> Result<(), SpectrumError> {
        let spectrum = self.transform.process(samples)?;
        self.buckets.reduce(spectrum, self.raw.row_mut(0));
        Ok(())
    }

    /// Rebuild the normalized history from the raw one.
    ///
    /// Level statistics come from the whole history, scaling is applied to the
    /// newest `display_depth` rows only.
    pub fn normalize(&mut self, display_depth: usize) {
        let depth = self.raw.depth();
        let count = self.raw.count();
        let display_depth = display_depth.min(depth);

        let mut full_max = i32::MIN;
        let mut full_min = i32::MAX;
        for j in 0..count {
            let mut bin_max = 0;
            for i in 0..depth {
                let raw = self.raw.get(i, j);
                let value = if self.options.contains(NormalizeOptions::LOGARITHMIC) {
                    to_decibels(raw)
                } else {
                    raw.max(0)
                };
                self.normalized.set(i, j, value);
                bin_max = bin_max.max(value);
                full_max = full_max.max(value);
            }
            full_min = full_min.min(bin_max);
        }
        let range = (full_max - full_min) as f64;

        for i in 0..display_depth {
            for j in 0..count {
                let mut value = self.normalized.get(i, j) as f64;
                if self.options.contains(NormalizeOptions::AUTOSCALE) {
                    let ratio = if range > 0.0 { (value - full_min as f64) / range } else { 0.0 };
                    value = FULL_SCALE * ratio.max(0.0);
                }
                if self.options.contains(NormalizeOptions::SIGMOID) {
                    value = self.config.sigmoid_params.apply(value);
                }
                self.normalized.set(i, j, value.max(0.0) as i32);
            }
        }
    }

    /// Statistics of the newest normalized row
    pub fn analyze(&mut self) -> BinStats {
        self.stats = BinStats::of(self.normalized.row(0));
        self.stats
    }

    fn compute_gains(&self, display_depth: usize) -> ColorGains {
        let count = self.normalized.count();
        let depth = display_depth.min(self.normalized.depth());
        let mut gains = ColorGains::default();

        for i in 0..depth {
            let weight = (depth - i) as f32 / depth as f32;
            for (j, &v) in self.normalized.row(i).iter().enumerate() {
                let amplitude = (v as f32 / FULL_SCALE as f32).clamp(0.0, 1.0);
                let position = if count > 1 { j as f32 / (count - 1) as f32 } else { 0.5 };
                let scaled = amplitude * weight;
                gains.red = gains.red.max(scaled * position);
                gains.green = gains.green.max(scaled * (1.0 - (2.0 * position - 1.0).abs()));
                gains.blue = gains.blue.max(scaled * (1.0 - position));
            }
        }
        gains
    }

    /// Latched transition since the last call; resets to `None`
    pub fn get_events(&mut self) -> AmplitudeEvent {
        std::mem::take(&mut self.event)
    }

    pub fn get_color_gains(&self) -> (f32, f32, f32) {
        (self.gains.red, self.gains.green, self.gains.blue)
    }

    pub fn color_gains(&self) -> ColorGains { self.gains }
}

fn to_decibels(raw: i32) -> i32 {
    if raw <= 0 {
        return 0;
    }
    (20.0 * (raw as f64).log10()).max(0.0) as i32
}
