// cpal-backed capture source
//
// The cpal audio callback pushes raw samples into an rtrb SPSC ring; a
// dedicated delivery thread batches them into `SampleBuffer`s and invokes the
// pipeline callback. The cpal stream lives entirely on the delivery thread
// (it is not `Send`), so the callback and the batch loop share only the ring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use super::{BufferCallback, CaptureSource, RawSamples, SampleBuffer, SampleSpec, SourceKind};
use crate::error::RecorderError;

/// Largest batch handed to the pipeline in one callback invocation.
const MAX_BATCH_SAMPLES: usize = 8192;

/// How long the delivery loop sleeps when the ring is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Live input device capture (microphone, or a loopback device for system
/// audio) delivering buffers in the device's native sample format.
pub struct DeviceCaptureSource {
    kind: SourceKind,
    /// Substring match against device names; `None` uses the default input.
    device_name: Option<String>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceCaptureSource {
    pub fn new(kind: SourceKind, device_name: Option<String>) -> Self {
        Self {
            kind,
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn find_device(name: &Option<String>) -> Result<cpal::Device, RecorderError> {
        let host = cpal::default_host();
        if let Some(wanted) = name {
            let mut devices = host
                .input_devices()
                .map_err(|e| RecorderError::Capture(format!("device enumeration failed: {e}")))?;
            devices
                .find(|d| {
                    d.name()
                        .map(|n| n.to_lowercase().contains(&wanted.to_lowercase()))
                        .unwrap_or(false)
                })
                .ok_or_else(|| RecorderError::Capture(format!("no input device matching '{wanted}'")))
        } else {
            host.default_input_device()
                .ok_or_else(|| RecorderError::Capture("no default input device".into()))
        }
    }
}

impl CaptureSource for DeviceCaptureSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn start(&mut self, deliver: BufferCallback) -> Result<(), RecorderError> {
        if self.handle.is_some() {
            return Err(RecorderError::Capture("source already started".into()));
        }

        let device = Self::find_device(&self.device_name)?;
        let supported = device
            .default_input_config()
            .map_err(|e| RecorderError::Capture(format!("no input config: {e}")))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        let spec = SampleSpec {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        info!(
            "🎤 CAPTURE: Starting {} source at {} Hz, {} channels ({:?})",
            self.kind.label(),
            spec.sample_rate,
            spec.channels,
            sample_format
        );

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let kind = self.kind;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", kind.label()))
            .spawn(move || match sample_format {
                cpal::SampleFormat::I16 => {
                    pump::<i16>(&device, &config, kind, spec, running, deliver, ready_tx, RawSamples::I16)
                }
                cpal::SampleFormat::U16 => {
                    pump::<u16>(&device, &config, kind, spec, running, deliver, ready_tx, RawSamples::U16)
                }
                cpal::SampleFormat::F32 => {
                    pump::<f32>(&device, &config, kind, spec, running, deliver, ready_tx, RawSamples::F32)
                }
                other => {
                    let _ = ready_tx.send(Err(format!("unsupported sample format {other:?}")));
                }
            })
            .map_err(|e| RecorderError::Capture(format!("failed to spawn delivery thread: {e}")))?;
        self.handle = Some(handle);

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => {
                self.running.store(false, Ordering::SeqCst);
                self.join();
                Err(RecorderError::Capture(msg))
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                self.join();
                Err(RecorderError::Capture("capture thread did not report ready".into()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("⚠️ CAPTURE: {} delivery thread panicked", self.kind.label());
            }
        }
    }
}

/// Runs one capture stream to completion: builds the cpal stream, pumps the
/// ring into `deliver`, and drains the ring one last time after `running`
/// clears so no tail samples are lost.
#[allow(clippy::too_many_arguments)]
fn pump<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    kind: SourceKind,
    spec: SampleSpec,
    running: Arc<AtomicBool>,
    deliver: BufferCallback,
    ready_tx: mpsc::Sender<Result<(), String>>,
    wrap: fn(Vec<T>) -> RawSamples,
) where
    T: cpal::SizedSample + Send + 'static,
{
    // One second of headroom between the audio callback and the batch loop.
    let capacity = (spec.sample_rate as usize * spec.channels as usize).max(MAX_BATCH_SAMPLES);
    let (mut producer, mut consumer) = rtrb::RingBuffer::<T>::new(capacity);

    let overrun_kind = kind;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut dropped = 0usize;
            for &sample in data {
                if producer.push(sample).is_err() {
                    dropped += 1;
                }
            }
            if dropped > 0 {
                // Ring full means the delivery thread is stalled; losing
                // samples here beats blocking the audio callback.
                warn!(
                    "⚠️ CAPTURE: {} ring overrun, dropped {} samples",
                    overrun_kind.label(),
                    dropped
                );
            }
        },
        move |e| warn!("⚠️ CAPTURE: stream error: {e}"),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to build input stream: {e}")));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("failed to start stream: {e}")));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let started = Instant::now();
    let mut batches = 0u64;

    let mut drain_batch = |consumer: &mut rtrb::Consumer<T>| -> bool {
        let available = consumer.slots();
        if available == 0 {
            return false;
        }
        let take = available.min(MAX_BATCH_SAMPLES);
        let mut samples = Vec::with_capacity(take);
        while samples.len() < take {
            match consumer.pop() {
                Ok(s) => samples.push(s),
                Err(_) => break,
            }
        }
        if samples.is_empty() {
            return false;
        }
        deliver(SampleBuffer {
            source: kind,
            pts: started.elapsed().as_secs_f64(),
            spec,
            data: wrap(samples),
        });
        batches += 1;
        if batches <= 3 || batches % 2000 == 0 {
            info!(
                "🎤 CAPTURE: {} delivered batch #{} ({} slots queued)",
                kind.label(),
                batches,
                consumer.slots()
            );
        }
        true
    };

    while running.load(Ordering::SeqCst) {
        if !drain_batch(&mut consumer) {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    // Stop the device before the final drain so the ring stops refilling,
    // then hand over whatever the callback managed to queue.
    drop(stream);
    while drain_batch(&mut consumer) {}
    info!(
        "🛑 CAPTURE: {} delivery thread exiting after {} batches",
        kind.label(),
        batches
    );
}
