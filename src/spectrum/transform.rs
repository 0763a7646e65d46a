/*
 *  spectrum/transform.rs
 *
 *  LyMatrix - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Spectral transform primitive and frequency bucket layout
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

use rustfft::num_complex::Complex;
use std::sync::Arc;

use crate::spectrum::SpectrumError;

const FFT_LOG_MIN: u32 = 4;
const FFT_LOG_MAX: u32 = 16;

/// Raw spectral transform: `size()` real samples in, the lower half of the
/// complex spectrum out. Pure apart from internal scratch buffers.
pub trait SpectralTransform: Send {
    fn size(&self) -> usize;

    fn process(&mut self, samples: &[i16]) -> Result<&[Complex<f32>], SpectrumError>;
}

/// Forward FFT on the CPU via `rustfft`
pub struct RustFftTransform {
    nfft: usize,
    fft: Arc<dyn rustfft::Fft<f32> + Send + Sync>,
    buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RustFftTransform {
    pub fn new(fft_log: u32) -> Result<Self, SpectrumError> {
        if !(FFT_LOG_MIN..=FFT_LOG_MAX).contains(&fft_log) {
            return Err(SpectrumError::Transform(format!(
                "log2 size {} not supported, use {}..={}", fft_log, FFT_LOG_MIN, FFT_LOG_MAX
            )));
        }
        let nfft = 1usize << fft_log;

        let mut planner = rustfft::FftPlanner::<f32>::new();
        let fft: Arc<dyn rustfft::Fft<f32> + Send + Sync> = planner.plan_fft_forward(nfft);

        let buf = vec![Complex::new(0.0, 0.0); nfft];
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Ok(Self { nfft, fft, buf, scratch })
    }
}

impl SpectralTransform for RustFftTransform {
    fn size(&self) -> usize {
        self.nfft
    }

    fn process(&mut self, samples: &[i16]) -> Result<&[Complex<f32>], SpectrumError> {
        if samples.len() != self.nfft {
            return Err(SpectrumError::SampleCount { expected: self.nfft, actual: samples.len() });
        }
        for (slot, &s) in self.buf.iter_mut().zip(samples) {
            *slot = Complex::new(s as f32, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);
        Ok(&self.buf[..self.nfft / 2])
    }
}

/// Bucket edges in Hz used by the 16 bucket default layout
pub const DEFAULT_BUCKET_EDGES: [f32; 17] = [
    20.0, 50.0, 100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0,
    500.0, 600.0, 750.0, 1000.0, 2000.0, 3000.0, 5000.0, 7500.0,
];

const LOG_BUCKET_MIN_HZ: f32 = 20.0;

/// Log spaced edges from 20 Hz to just below Nyquist
pub fn log_bucket_edges(buckets: usize, sample_rate: u32) -> Vec<f32> {
    let nyq = sample_rate as f32 / 2.0;
    let fmin = LOG_BUCKET_MIN_HZ.min(nyq - 1.0).max(1.0);
    let fmax = (nyq * 0.98).max(fmin + 1.0);
    (0..=buckets)
        .map(|i| {
            let t = i as f32 / buckets as f32;
            fmin * (fmax / fmin).powf(t)
        })
        .collect()
}

/// Which bucket each transform output bin falls into.
///
/// Bin `k` has frequency `k * rate / n`; bucket `j` takes `[edges[j], edges[j+1])`.
#[derive(Debug, Clone)]
pub struct BucketMap {
    buckets: usize,
    bin_bucket: Vec<Option<usize>>,
}

impl BucketMap {
    pub fn new(edges: &[f32], fft_size: usize, sample_rate: u32) -> Result<Self, SpectrumError> {
        if edges.len() < 2 {
            return Err(SpectrumError::Buckets("need at least two bucket edges".into()));
        }
        if let Some(w) = edges.windows(2).find(|w| !(w[0] < w[1])) {
            return Err(SpectrumError::Buckets(format!(
                "bucket edges must increase ({} then {})", w[0], w[1]
            )));
        }

        let bin_hz = sample_rate as f32 / fft_size as f32;
        let bin_bucket = (0..fft_size / 2)
            .map(|k| {
                let frequency = k as f32 * bin_hz;
                edges.windows(2).position(|w| frequency >= w[0] && frequency < w[1])
            })
            .collect();

        Ok(Self { buckets: edges.len() - 1, bin_bucket })
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn bucket_of(&self, bin: usize) -> Option<usize> {
        self.bin_bucket.get(bin).copied().flatten()
    }

    /// Buckets too narrow to receive any transform bin
    pub fn empty_buckets(&self) -> Vec<usize> {
        (0..self.buckets)
            .filter(|j| !self.bin_bucket.contains(&Some(*j)))
            .collect()
    }

    /// Max magnitude per bucket into `out`
    pub fn reduce(&self, spectrum: &[Complex<f32>], out: &mut [i32]) {
        out.fill(0);
        for (k, z) in spectrum.iter().enumerate() {
            if let Some(j) = self.bucket_of(k) {
                let value = z.norm() as i32;
                if value > out[j] {
                    out[j] = value;
                }
            }
        }
    }
}
