//! Integration Tests
//!
//! End-to-end sessions through the public engine API: load, analyse,
//! record, align and bounce.

use approx::assert_abs_diff_eq;
use pretty_assertions::assert_eq;

use takebooth::capture::{BufferMicrophone, ScriptedBackend};
use takebooth::cli::commands::{self, MixOptions};
use takebooth::dsp::{DelayUpdate, EffectParameters, ReverbUpdate};
use takebooth::engine::io::{
    generate_click_track, generate_delayed_tone, AudioDecoder, ExportFormat, WavDecoder,
    WavEncoder,
};
use takebooth::{AudioBuffer, EngineConfig, EngineController, EngineEvent, EngineState};

const RATE: u32 = 8000;

fn config(seed: u64) -> EngineConfig {
    EngineConfig {
        sample_rate: RATE,
        block_size: 128,
        partition_size: 128,
        reverb_seed: Some(seed),
        ..Default::default()
    }
}

fn params() -> EffectParameters {
    let mut params = EffectParameters::default();
    params.reverb.duration = 0.5;
    params
}

fn engine(seed: u64) -> EngineController {
    let mut engine = EngineController::new(config(seed))
        .unwrap()
        .with_params(params());
    engine.initialize().unwrap();
    engine
}

fn wav(buffer: &AudioBuffer) -> Vec<u8> {
    WavEncoder::encode_buffer(buffer, ExportFormat::default())
        .unwrap()
        .bytes
}

fn click_beat(seconds: f64) -> Vec<u8> {
    wav(&generate_click_track(120.0, seconds, 0.01, RATE))
}

// === Analysis and alignment ===

#[test]
fn test_session_aligns_late_vocal() {
    let mut engine = engine(1);
    let analysis = engine.load_beat(&click_beat(4.0)).unwrap();
    let tempo = analysis.tempo.unwrap();
    assert!((tempo - 120.0).abs() <= 2.0, "tempo {}", tempo);
    assert_abs_diff_eq!(analysis.downbeat_offset.unwrap(), 0.0, epsilon = 4.0 / 500.0);

    let onset = engine
        .load_vocal(&wav(&generate_delayed_tone(0.62, 1.0, 440.0, 0.8, RATE)))
        .unwrap();
    assert_abs_diff_eq!(onset, 0.62, epsilon = 0.005);

    let alignment = engine.start_playback().unwrap();
    assert_abs_diff_eq!(alignment.quantized_target.unwrap(), 0.5, epsilon = 1e-9);
    assert!(alignment.alignment_shift.unwrap() < 0.0);
    assert_eq!(engine.last_alignment(), alignment);
    engine.stop_playback();
}

#[test]
fn test_early_vocal_is_delayed() {
    let mut engine = engine(1);
    engine.load_beat(&click_beat(4.0)).unwrap();
    engine
        .load_vocal(&wav(&generate_delayed_tone(0.3, 0.5, 440.0, 0.8, RATE)))
        .unwrap();
    let alignment = engine.start_playback().unwrap();
    assert_abs_diff_eq!(alignment.quantized_target.unwrap(), 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(alignment.alignment_shift.unwrap(), 0.2, epsilon = 0.005);
}

#[test]
fn test_silent_beat_has_no_alignment() {
    let mut engine = engine(1);
    let analysis = engine
        .load_beat(&wav(&AudioBuffer::new(1, RATE as usize * 2, RATE)))
        .unwrap();
    assert_eq!(analysis.tempo, None);
    assert_eq!(analysis.downbeat_offset, None);

    engine
        .load_vocal(&wav(&generate_delayed_tone(0.3, 0.5, 440.0, 0.8, RATE)))
        .unwrap();
    let alignment = engine.start_playback().unwrap();
    assert_eq!(alignment.quantized_target, None);
    assert_eq!(alignment.alignment_shift, None);
}

// === Recording ===

#[test]
fn test_recording_session_events() {
    let script = vec![
        vec![vec![0.1; 256], vec![0.2; 256]],
        vec![vec![0.1; 256], vec![0.2; 256]],
        vec![vec![0.1; 128], vec![0.2; 128]],
    ];
    let mut engine = EngineController::new(config(1))
        .unwrap()
        .with_params(params())
        .with_capture_backend(Box::new(ScriptedBackend::new(script)));
    engine.initialize().unwrap();
    engine.load_beat(&click_beat(2.0)).unwrap();
    let events = engine.subscribe();

    engine.start_recording().unwrap();
    assert_eq!(engine.state(), EngineState::Recording);
    let mut out = AudioBuffer::new(2, 128, RATE);
    for _ in 0..2 {
        engine.process_block(&mut out).unwrap();
    }
    let take = engine.stop_recording().unwrap().unwrap();

    assert_eq!(take.len(), 640);
    assert_eq!(take.channel(0)[639], 0.1);
    assert_eq!(take.channel(1)[0], 0.2);
    assert_abs_diff_eq!(engine.vocal_duration(), 0.08);
    assert_eq!(engine.vocal_waveform().len(), 512);
    assert_eq!(engine.state(), EngineState::Idle);

    let received: Vec<EngineEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            EngineEvent::RecordingStateChanged(true),
            EngineEvent::RecordingStateChanged(false),
            EngineEvent::VocalUpdated(Some(640.0 / 8000.0)),
        ]
    );
}

#[test]
fn test_live_microphone_take() {
    let sung = generate_delayed_tone(0.25, 0.5, 330.0, 0.6, RATE);
    let mut engine = EngineController::new(config(1))
        .unwrap()
        .with_params(params())
        .with_microphone(Box::new(BufferMicrophone::new(sung)));
    engine.initialize().unwrap();

    engine.start_recording().unwrap();
    let mut out = AudioBuffer::new(2, 128, RATE);
    // One second of capture
    for _ in 0..(RATE as usize / 128) {
        engine.process_block(&mut out).unwrap();
    }
    let take = engine.stop_recording().unwrap().unwrap();
    assert_eq!(take.len(), (RATE as usize / 128) * 128);
    let onset = engine.vocal_onset().unwrap();
    assert!(onset > 0.2 && onset < 0.3, "onset {}", onset);
}

// === Export ===

#[test]
fn test_export_length_and_format() {
    let mut engine = engine(1);
    engine.load_beat(&click_beat(2.0)).unwrap();
    let media = engine.export_mix().unwrap();

    assert_eq!(media.mime_type, "audio/wav");
    assert_eq!(media.sample_rate, RATE);
    assert_eq!(media.channels, 2);
    assert_abs_diff_eq!(media.duration_secs, 2.6, epsilon = 1e-9);
    assert_eq!(media.checksum.len(), 64);
    assert!(!engine.is_playing());

    let decoded = WavDecoder.decode(&media.bytes).unwrap();
    assert_eq!(decoded.len(), (2.6 * RATE as f64).round() as usize);
    assert!(decoded.peak() > 0.1);
}

#[test]
fn test_identical_seeds_export_identical_mixes() {
    let render = |seed: u64| {
        let mut engine = engine(seed);
        engine.load_beat(&click_beat(1.0)).unwrap();
        engine
            .load_vocal(&wav(&generate_delayed_tone(0.1, 0.5, 440.0, 0.5, RATE)))
            .unwrap();
        engine.update_reverb(ReverbUpdate {
            mix: Some(0.6),
            ..Default::default()
        });
        engine.update_delay(DelayUpdate {
            time: Some(0.2),
            ..Default::default()
        });
        engine.export_mix().unwrap()
    };
    assert_eq!(render(11).checksum, render(11).checksum);
    assert_ne!(render(11).checksum, render(12).checksum);
}

#[test]
fn test_export_sixteen_bit() {
    let mut engine = EngineController::new(EngineConfig {
        export_bit_depth: 16,
        ..config(1)
    })
    .unwrap()
    .with_params(params());
    engine.initialize().unwrap();
    engine.load_beat(&click_beat(1.0)).unwrap();
    let media = engine.export_mix().unwrap();

    let reader = hound::WavReader::new(std::io::Cursor::new(&media.bytes)).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.spec().sample_format, hound::SampleFormat::Int);
    // 1.6 s per channel
    assert_eq!(reader.duration(), 12800);
}

#[test]
fn test_export_after_clearing_everything() {
    let mut engine = engine(1);
    engine
        .load_vocal(&wav(&generate_delayed_tone(0.1, 0.2, 440.0, 0.5, RATE)))
        .unwrap();
    engine.clear_vocal_take();
    let err = engine.export_mix().unwrap_err();
    assert_eq!(err.error_code(), "NOTHING_TO_EXPORT");
    assert_eq!(
        err.to_string(),
        "Nothing to export. Load a beat or record vocals first."
    );
}

// === CLI ===

#[test]
fn test_cli_mix_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let beat = dir.path().join("beat.wav");
    std::fs::write(&beat, click_beat(1.0)).unwrap();
    let params_path = dir.path().join("params.json");
    std::fs::write(&params_path, r#"{"reverb": {"duration": 0.5}}"#).unwrap();
    let config_path = dir.path().join("engine.json");
    config(5).save(&config_path).unwrap();

    let out = dir.path().join("mix.wav");
    let media = commands::mix(&MixOptions {
        beat: Some(beat),
        out: out.clone(),
        params: Some(params_path),
        config: Some(config_path),
        ..Default::default()
    })
    .unwrap();

    let written = std::fs::read(&out).unwrap();
    assert_eq!(written, media.bytes);
    assert_abs_diff_eq!(media.duration_secs, 1.6, epsilon = 1e-9);
}
