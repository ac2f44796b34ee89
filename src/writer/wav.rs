// WAV container sink
//
// Uncompressed PCM output: 44-byte RIFF header written before the first
// payload, f32 samples quantized to the configured bit depth, and the
// RIFF/data size fields patched in place at finalize. Writes go through a
// buffered std writer; the pipeline calls arrive from capture delivery
// threads under the pipeline mutex, never from async context.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use super::sink::{ContainerSink, TrackDescriptor, TrackKind, VideoFrame};

const HEADER_LEN: u64 = 44;

pub struct WavFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    desc: Option<(u32, u16, u16)>,
    header_written: bool,
    data_bytes: u64,
    finished: bool,
}

impl WavFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            desc: None,
            header_written: false,
            data_bytes: 0,
            finished: false,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn header(sample_rate: u32, channels: u16, bit_depth: u16) -> Vec<u8> {
        let byte_rate = sample_rate * channels as u32 * (bit_depth as u32 / 8);
        let block_align = channels * (bit_depth / 8);

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&[0, 0, 0, 0]); // patched at finalize
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        let format_code: u16 = if bit_depth == 32 { 3 } else { 1 }; // IEEE float vs PCM
        header.extend_from_slice(&format_code.to_le_bytes());
        header.extend_from_slice(&channels.to_le_bytes());
        header.extend_from_slice(&sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&block_align.to_le_bytes());
        header.extend_from_slice(&bit_depth.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&[0, 0, 0, 0]); // patched at finalize
        header
    }

    /// RIFF and data chunk sizes for the header patch. The fields are 32-bit;
    /// past 4 GiB they saturate rather than wrap into a corrupt header.
    fn riff_sizes(data_bytes: u64) -> (u32, u32) {
        let riff = (HEADER_LEN - 8 + data_bytes).min(u32::MAX as u64) as u32;
        let data = data_bytes.min(u32::MAX as u64) as u32;
        (riff, data)
    }

    fn quantize(samples: &[f32], bit_depth: u16) -> Vec<u8> {
        match bit_depth {
            16 => {
                let mut out = Vec::with_capacity(samples.len() * 2);
                for &sample in samples {
                    let s = (sample.clamp(-1.0, 1.0) * 32_767.0) as i16;
                    out.extend_from_slice(&s.to_le_bytes());
                }
                out
            }
            24 => {
                let mut out = Vec::with_capacity(samples.len() * 3);
                for &sample in samples {
                    let s = (sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                    out.push((s & 0xFF) as u8);
                    out.push(((s >> 8) & 0xFF) as u8);
                    out.push(((s >> 16) & 0xFF) as u8);
                }
                out
            }
            // 32-bit stays IEEE float per the header's format code.
            _ => {
                let mut out = Vec::with_capacity(samples.len() * 4);
                for &sample in samples {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
                out
            }
        }
    }
}

impl ContainerSink for WavFileSink {
    fn add_track(&mut self, kind: TrackKind, desc: TrackDescriptor) -> Result<()> {
        match (kind, desc) {
            (
                TrackKind::Audio,
                TrackDescriptor::Audio {
                    sample_rate,
                    channels,
                    bit_depth,
                },
            ) => {
                if self.desc.is_some() {
                    return Err(anyhow!("audio track already negotiated"));
                }
                let file = File::create(&self.path)
                    .with_context(|| format!("failed to create {}", self.path.display()))?;
                self.writer = Some(BufWriter::new(file));
                self.desc = Some((sample_rate, channels, bit_depth));
                info!(
                    "💾 WAV: created {} ({} Hz, {} ch, {} bit)",
                    self.path.display(),
                    sample_rate,
                    channels,
                    bit_depth
                );
                Ok(())
            }
            (TrackKind::Video, _) => Err(anyhow!("wav container cannot hold a video track")),
            _ => Err(anyhow!("mismatched track descriptor")),
        }
    }

    fn start_session(&mut self, at: f64) -> Result<()> {
        info!("💾 WAV: session timeline starts at {at:.6}s");
        Ok(())
    }

    fn append_audio(&mut self, _pts: f64, samples: &[f32]) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        let (rate, channels, bit_depth) =
            self.desc.ok_or_else(|| anyhow!("audio track not negotiated"))?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("sink file not open"))?;

        if !self.header_written {
            writer
                .write_all(&Self::header(rate, channels, bit_depth))
                .context("failed to write wav header")?;
            self.header_written = true;
        }

        let payload = Self::quantize(samples, bit_depth);
        writer
            .write_all(&payload)
            .context("failed to write audio payload")?;
        self.data_bytes += payload.len() as u64;
        Ok(true)
    }

    fn append_video(&mut self, _frame: &VideoFrame) -> Result<bool> {
        Err(anyhow!("wav container cannot hold a video track"))
    }

    fn mark_finished(&mut self, kind: TrackKind) {
        if kind == TrackKind::Audio {
            self.finished = true;
        }
    }

    fn finalize(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            // No buffer ever arrived; nothing was created beyond the file.
            return Ok(());
        };
        let mut file = writer
            .into_inner()
            .context("failed to flush wav writer")?;

        if self.header_written {
            let (riff_size, data_size) = Self::riff_sizes(self.data_bytes);
            file.seek(SeekFrom::Start(4))?;
            file.write_all(&riff_size.to_le_bytes())?;
            file.seek(SeekFrom::Start(40))?;
            file.write_all(&data_size.to_le_bytes())?;
        }
        file.sync_all()
            .with_context(|| format!("failed to sync {}", self.path.display()))?;

        info!(
            "💾 WAV: finalized {} ({} data bytes)",
            self.path.display(),
            self.data_bytes
        );
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        if self.header_written {
            HEADER_LEN + self.data_bytes
        } else {
            0
        }
    }
}
