// Format normalizer
//
// Converts each source's native buffers into the canonical format: interleaved
// f32 at the session's sample rate and channel count. One stateful converter
// per source kind, rebuilt only when the incoming format actually changes.
// Resampling goes through rubato's FastFixedIn with a fixed input chunk and a
// per-channel accumulator; an empty result while the accumulator fills is
// normal operation, not a failure.

use anyhow::{anyhow, Context, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::info;

use crate::capture::{RawSamples, SampleBuffer, SampleSpec};

/// Fixed input chunk fed to the resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// Streaming resampler: accumulates deinterleaved input and processes it in
/// fixed chunks, carrying the remainder to the next buffer.
struct StreamResampler {
    inner: FastFixedIn<f32>,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self> {
        let inner = FastFixedIn::new(
            output_rate as f64 / input_rate as f64,
            2.0,
            PolynomialDegree::Septic,
            RESAMPLE_CHUNK,
            channels as usize,
        )
        .with_context(|| format!("failed to create resampler {input_rate} Hz -> {output_rate} Hz"))?;

        Ok(Self {
            inner,
            channels: channels as usize,
            pending: vec![Vec::new(); channels as usize],
        })
    }

    /// Feed interleaved samples; returns whatever full chunks produced,
    /// interleaved. May return an empty vector while accumulating.
    fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        for frame in interleaved.chunks_exact(self.channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.pending[ch].push(sample);
            }
        }

        let mut out = Vec::new();
        while self.pending[0].len() >= RESAMPLE_CHUNK {
            let input: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..RESAMPLE_CHUNK).collect())
                .collect();
            let resampled = self
                .inner
                .process(&input, None)
                .context("resampler chunk failed")?;

            let frames = resampled.first().map_or(0, Vec::len);
            out.reserve(frames * self.channels);
            for i in 0..frames {
                for ch in &resampled {
                    out.push(ch[i]);
                }
            }
        }
        Ok(out)
    }
}

/// Key identifying the converter configuration; a mismatch rebuilds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConverterKey {
    spec: SampleSpec,
    format_tag: &'static str,
}

/// Per-source normalizer into the canonical target format.
pub struct FormatNormalizer {
    target_rate: u32,
    target_channels: u16,
    active: Option<(ConverterKey, Option<StreamResampler>)>,
}

impl FormatNormalizer {
    pub fn new(target_rate: u32, target_channels: u16) -> Self {
        Self {
            target_rate,
            target_channels,
            active: None,
        }
    }

    /// Normalize one buffer. `Ok` with an empty vector means the resampler is
    /// still accumulating; `Err` means the buffer could not be converted and
    /// should be dropped (the caller owns warn-once logging).
    pub fn normalize(&mut self, buffer: &SampleBuffer) -> Result<Vec<f32>> {
        let spec = buffer.spec;
        if spec.sample_rate == 0 || spec.channels == 0 {
            return Err(anyhow!(
                "undecodable buffer format: {} Hz, {} channels",
                spec.sample_rate,
                spec.channels
            ));
        }
        if buffer.data.is_empty() {
            return Err(anyhow!("conversion produced no frames"));
        }

        let key = ConverterKey {
            spec,
            format_tag: buffer.data.format_tag(),
        };
        self.ensure_converter(key, buffer.source.label())?;

        let as_f32 = to_f32(&buffer.data);
        let mapped = map_channels(&as_f32, spec.channels, self.target_channels);

        match &mut self.active {
            Some((_, Some(resampler))) => resampler.process(&mapped),
            _ => Ok(mapped),
        }
    }

    fn ensure_converter(&mut self, key: ConverterKey, source: &str) -> Result<()> {
        if matches!(&self.active, Some((active, _)) if *active == key) {
            return Ok(());
        }
        let resampler = if key.spec.sample_rate != self.target_rate {
            info!(
                "🔧 NORMALIZER: {} converter {} Hz -> {} Hz ({} ch -> {} ch, {})",
                source,
                key.spec.sample_rate,
                self.target_rate,
                key.spec.channels,
                self.target_channels,
                key.format_tag
            );
            Some(StreamResampler::new(
                key.spec.sample_rate,
                self.target_rate,
                self.target_channels,
            )?)
        } else {
            None
        };
        self.active = Some((key, resampler));
        Ok(())
    }
}

fn to_f32(data: &RawSamples) -> Vec<f32> {
    match data {
        RawSamples::F32(v) => v.clone(),
        RawSamples::I16(v) => v.iter().map(|&s| s as f32 / 32_768.0).collect(),
        RawSamples::U16(v) => v.iter().map(|&s| (s as f32 - 32_768.0) / 32_768.0).collect(),
    }
}

/// Remap interleaved samples to the target channel count: mono fans out,
/// multi-channel folds down to mono by averaging, otherwise copy what exists
/// per frame and zero any extra target channels.
fn map_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from as usize, to as usize);
    if from == to {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                out.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SourceKind;

    fn buffer(spec: SampleSpec, data: RawSamples) -> SampleBuffer {
        SampleBuffer {
            source: SourceKind::Microphone,
            pts: 0.0,
            spec,
            data,
        }
    }

    #[test]
    fn i16_full_scale_maps_to_unit_range() {
        let mut n = FormatNormalizer::new(48_000, 2);
        let spec = SampleSpec {
            sample_rate: 48_000,
            channels: 2,
        };
        let out = n
            .normalize(&buffer(spec, RawSamples::I16(vec![i16::MIN, i16::MAX])))
            .unwrap();
        assert!((out[0] + 1.0).abs() < 1e-6);
        assert!((out[1] - 0.99996).abs() < 1e-3);
    }

    #[test]
    fn mono_input_fans_out_to_stereo() {
        let mut n = FormatNormalizer::new(48_000, 2);
        let spec = SampleSpec {
            sample_rate: 48_000,
            channels: 1,
        };
        let out = n
            .normalize(&buffer(spec, RawSamples::F32(vec![0.25, -0.5])))
            .unwrap();
        assert_eq!(out, vec![0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn empty_buffer_is_an_error() {
        let mut n = FormatNormalizer::new(48_000, 2);
        let spec = SampleSpec {
            sample_rate: 48_000,
            channels: 2,
        };
        assert!(n.normalize(&buffer(spec, RawSamples::F32(vec![]))).is_err());
    }

    #[test]
    fn resampler_accumulates_then_produces() {
        let mut n = FormatNormalizer::new(48_000, 1);
        let spec = SampleSpec {
            sample_rate: 44_100,
            channels: 1,
        };
        // Below one chunk: accumulating, empty output is fine.
        let first = n
            .normalize(&buffer(spec, RawSamples::F32(vec![0.1; 512])))
            .unwrap();
        assert!(first.is_empty());
        // Crossing the chunk boundary must produce output at roughly the
        // target/source rate ratio.
        let second = n
            .normalize(&buffer(spec, RawSamples::F32(vec![0.1; 1024])))
            .unwrap();
        assert!(!second.is_empty());
    }

    #[test]
    fn format_change_rebuilds_converter() {
        let mut n = FormatNormalizer::new(48_000, 2);
        let spec_a = SampleSpec {
            sample_rate: 44_100,
            channels: 2,
        };
        let spec_b = SampleSpec {
            sample_rate: 16_000,
            channels: 1,
        };
        n.normalize(&buffer(spec_a, RawSamples::F32(vec![0.0; 256])))
            .unwrap();
        // A different spec mid-stream must not error; the converter rebuilds.
        n.normalize(&buffer(spec_b, RawSamples::F32(vec![0.0; 256])))
            .unwrap();
    }
}
