//! Spectrum analysis for the level-meter visualization.
//!
//! Each analyzer tick reads the most recent [`FFT_SIZE`] samples from a
//! rolling [`AnalysisWindow`], applies a Hann window, runs a forward FFT, and
//! folds the magnitude spectrum onto a byte-like 0..255 scale with per-bin
//! exponential smoothing (factor [`SMOOTHING`]). [`band_levels`] then
//! partitions the bins into equal contiguous buckets, averages each bucket,
//! and normalizes by the fixed ceiling [`LEVEL_CEILING`], clamped to [0, 1].
//!
//! Nothing produced here is authoritative speech content — it exists purely
//! to drive the listening visualization.

use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// FFT window length in samples.
pub const FFT_SIZE: usize = 256;

/// Number of magnitude bins produced per analysis pass.
pub const BIN_COUNT: usize = FFT_SIZE / 2;

/// Default number of visualization bands.
pub const DEFAULT_BAND_COUNT: usize = 12;

/// Band count used by the lighter meter variant.
pub const LIGHT_BAND_COUNT: usize = 5;

/// Fixed reference ceiling dividing bucket means into [0, 1].
pub const LEVEL_CEILING: f32 = 128.0;

/// Per-bin exponential smoothing: `prev * SMOOTHING + new * (1 - SMOOTHING)`.
pub const SMOOTHING: f32 = 0.8;

/// Byte ceiling for a folded magnitude bin.
const BIN_MAX: f32 = 255.0;

/// Scale from raw FFT magnitude to the byte range. A full-scale sine under a
/// Hann window peaks near `FFT_SIZE / 4`, which this maps to the bin ceiling.
const BYTE_SCALE: f32 = BIN_MAX / (FFT_SIZE as f32 / 4.0);

/// Rolling buffer of the most recent capture samples, shared between the
/// publish pump (writer) and the analyzer tick (reader).
#[derive(Clone, Default)]
pub struct AnalysisWindow {
    inner: Arc<Mutex<Vec<f32>>>,
}

impl AnalysisWindow {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![0.0; FFT_SIZE])),
        }
    }

    /// Append samples, keeping only the trailing [`FFT_SIZE`].
    pub fn push(&self, samples: &[f32]) {
        let mut buf = self.inner.lock();
        if samples.len() >= FFT_SIZE {
            buf.clear();
            buf.extend_from_slice(&samples[samples.len() - FFT_SIZE..]);
            return;
        }
        let overflow = (buf.len() + samples.len()).saturating_sub(FFT_SIZE);
        buf.drain(..overflow);
        buf.extend_from_slice(samples);
    }

    /// Copy the current window into `out`, zero-padding when underfilled.
    pub fn snapshot(&self, out: &mut [f32; FFT_SIZE]) {
        let buf = self.inner.lock();
        out.fill(0.0);
        let n = buf.len().min(FFT_SIZE);
        out[FFT_SIZE - n..].copy_from_slice(&buf[buf.len() - n..]);
    }
}

/// Stateful spectrum analyzer: Hann window + forward FFT + smoothed
/// byte-scaled magnitude bins.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    fft_buf: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            fft: Arc::from(FftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE)),
            hann: build_hann_window(FFT_SIZE),
            fft_buf: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            smoothed: vec![0.0; BIN_COUNT],
        }
    }

    /// Analyze one window of samples, returning the smoothed magnitude bins
    /// on the 0..255 scale.
    pub fn analyze(&mut self, samples: &[f32; FFT_SIZE]) -> &[f32] {
        for (dst, (s, w)) in self
            .fft_buf
            .iter_mut()
            .zip(samples.iter().zip(self.hann.iter()))
        {
            *dst = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.fft_buf);

        for (bin, c) in self.smoothed.iter_mut().zip(self.fft_buf.iter()) {
            let scaled = (c.norm() * BYTE_SCALE).min(BIN_MAX);
            *bin = *bin * SMOOTHING + scaled * (1.0 - SMOOTHING);
        }
        &self.smoothed
    }
}

/// Partition `bins` into `bands` equal contiguous buckets, average each, and
/// normalize by [`LEVEL_CEILING`] clamped to [0, 1].
pub fn band_levels(bins: &[f32], bands: usize) -> Vec<f32> {
    if bands == 0 || bins.is_empty() {
        return vec![0.0; bands];
    }
    (0..bands)
        .map(|i| {
            let start = i * bins.len() / bands;
            let end = ((i + 1) * bins.len() / bands).max(start + 1).min(bins.len());
            let mean = bins[start..end].iter().sum::<f32>() / (end - start) as f32;
            (mean / LEVEL_CEILING).clamp(0.0, 1.0)
        })
        .collect()
}

/// Overall level: mean bin magnitude over the same ceiling, clamped to [0, 1].
pub fn average_level(bins: &[f32]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let mean = bins.iter().sum::<f32>() / bins.len() as f32;
    (mean / LEVEL_CEILING).clamp(0.0, 1.0)
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}
