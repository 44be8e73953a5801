//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! cpal captures at the device's native rate (commonly 48 kHz); the published
//! track runs at the session's publish rate (16 kHz by default).
//! `RateConverter` bridges that gap on the pump thread, where allocation is
//! allowed. When the rates already match no rubato session is created at all
//! and `process` is a passthrough.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, VoiceError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == publish rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// Input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl std::fmt::Debug for RateConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateConverter")
            .field("passthrough", &self.resampler.is_none())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl RateConverter {
    /// Create a converter from `capture_rate` to `publish_rate` Hz.
    ///
    /// # Errors
    /// Returns `VoiceError::Resource` if rubato fails to initialise.
    pub fn new(capture_rate: u32, publish_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == publish_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = publish_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| VoiceError::Resource(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(capture_rate, publish_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning converted output (may be empty).
    ///
    /// Samples accumulate internally until a full `chunk_size` block is
    /// available for rubato; any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }
        result
    }

    /// `true` when capture rate == publish rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        // 960 input samples at 48 kHz → ~320 at 16 kHz
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty(), "expected non-empty output");
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected≈320",
            out.len()
        );
    }

    #[test]
    fn zero_publish_rate_is_rejected_at_construction() {
        let err = RateConverter::new(48_000, 0, 960).unwrap_err();
        assert!(matches!(err, VoiceError::Resource(_)));
    }

    #[test]
    fn partial_chunk_accumulates_until_full() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(
            !rc.process(&vec![0.0f32; 500]).is_empty(),
            "second push crosses chunk_size and should produce output"
        );
    }
}
