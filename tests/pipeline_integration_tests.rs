use tapedeck::capture::{RawSamples, SampleBuffer, SampleSpec, SourceKind};
use tapedeck::pipeline::mixer::{mix_samples, CHUNK_FRAMES};
use tapedeck::writer::sink::TrackDescriptor;
use tapedeck::{AudioPipeline, MixMode, RecorderConfig, WavFileSink, WriterSession};

use proptest::prelude::*;

fn buffer(source: SourceKind, pts: f64, value: f32, frames: usize) -> SampleBuffer {
    SampleBuffer {
        source,
        pts,
        spec: SampleSpec {
            sample_rate: 48_000,
            channels: 1,
        },
        data: RawSamples::F32(vec![value; frames]),
    }
}

fn wav_pipeline(
    mode: MixMode,
    path: std::path::PathBuf,
) -> AudioPipeline {
    let config = RecorderConfig {
        mix_mode: mode,
        sample_rate: 48_000,
        channels: 1,
        bit_depth: 16,
        ..Default::default()
    };
    let writer = WriterSession::new(
        Box::new(WavFileSink::new(path)),
        TrackDescriptor::Audio {
            sample_rate: 48_000,
            channels: 1,
            bit_depth: 16,
        },
        false,
    );
    AudioPipeline::new(&config, writer)
}

mod wav_output_tests {
    use super::*;

    #[test]
    fn single_source_session_writes_a_valid_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let pipeline = wav_pipeline(MixMode::SystemOnly, path.clone());

        pipeline.ingest(buffer(SourceKind::System, 0.0, 0.25, 4 * CHUNK_FRAMES));
        let stats = pipeline.finish().unwrap();
        assert_eq!(stats.chunks_accepted, 4);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let data_size = u32::from_le_bytes(bytes[40..44].try_into().unwrap()) as usize;
        assert_eq!(data_size, 4 * CHUNK_FRAMES * 2); // 16-bit mono
        assert_eq!(bytes.len(), 44 + data_size);
    }

    #[test]
    fn dual_mode_never_stalls_on_the_slower_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.wav");
        let pipeline = wav_pipeline(MixMode::Dual, path.clone());

        // Each ingest drains immediately, so the source that has not caught up
        // yet is mixed as silence rather than holding the chunk back.
        pipeline.ingest(buffer(SourceKind::System, 0.0, 0.5, CHUNK_FRAMES));
        pipeline.ingest(buffer(SourceKind::Microphone, 0.0, 0.5, CHUNK_FRAMES));
        let stats = pipeline.finish().unwrap();
        assert_eq!(stats.chunks_accepted, 2);

        // Both chunks mix one live source against padded silence:
        // (1.0 * 0.5 + 0.0) / 2 and (1.0 * 0.0 + 0.5) / 2.
        let bytes = std::fs::read(&path).unwrap();
        let expected = (0.25f32 * 32_767.0) as i16;
        let first = i16::from_le_bytes(bytes[44..46].try_into().unwrap());
        let offset = 44 + CHUNK_FRAMES * 2;
        let second = i16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap());
        assert_eq!(first, expected);
        assert_eq!(second, expected);
    }
}

mod mix_formula_tests {
    use super::*;

    #[test]
    fn gain_above_unity_can_clip() {
        assert_eq!(mix_samples(1.0, 1.0, 3.0), 1.0);
        assert_eq!(mix_samples(-1.0, -1.0, 3.0), -1.0);
    }

    proptest! {
        #[test]
        fn mixed_sample_is_always_in_range(
            system in -1.0f32..=1.0,
            microphone in -1.0f32..=1.0,
            gain in 0.0f32..=4.0,
        ) {
            let mixed = mix_samples(system, microphone, gain);
            prop_assert!((-1.0..=1.0).contains(&mixed));
        }

        #[test]
        fn unity_gain_mix_is_the_average(
            system in -0.5f32..=0.5,
            microphone in -0.5f32..=0.5,
        ) {
            let mixed = mix_samples(system, microphone, 1.0);
            prop_assert!((mixed - (system + microphone) / 2.0).abs() < 1e-6);
        }
    }
}
