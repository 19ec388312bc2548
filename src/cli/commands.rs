//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::analysis::{
    AlignmentInputs, AlignmentPlanner, BeatAnalysis, BeatAnalyzer, OnsetDetector, PlaybackPlan,
};
use crate::config::EngineConfig;
use crate::dsp::EffectParameters;
use crate::engine::io::{AudioDecoder, EncodedMedia, WavDecoder};
use crate::engine::{AudioBuffer, EngineController};

/// Analysis of one backing track
#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub analysis: BeatAnalysis,
}

/// Options of the `mix` command
#[derive(Debug, Clone, Default)]
pub struct MixOptions {
    pub beat: Option<PathBuf>,
    pub vocal: Option<PathBuf>,
    pub out: PathBuf,
    pub params: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    pub bit_depth: Option<u16>,
}

fn decode_file(path: &Path) -> Result<AudioBuffer> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let buffer = WavDecoder
        .decode(&bytes)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok(buffer)
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Analyse a file, or every WAV file below a directory
///
/// Unreadable files inside a directory are skipped with a warning.
pub fn analyze_path(path: &Path) -> Result<Vec<TrackReport>> {
    let analyzer = BeatAnalyzer::new();

    if !path.is_dir() {
        let buffer = decode_file(path)?;
        return Ok(vec![TrackReport {
            path: path.to_path_buf(),
            analysis: analyzer.analyze(&buffer),
        }]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_wav(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        match decode_file(&file) {
            Ok(buffer) => reports.push(TrackReport {
                analysis: analyzer.analyze(&buffer),
                path: file,
            }),
            Err(e) => warn!(path = %file.display(), error = %e, "Skipping track"),
        }
    }
    info!(tracks = reports.len(), "Analysis complete");
    Ok(reports)
}

/// Print one JSON line per analysed track.
pub fn analyze(path: &Path) -> Result<()> {
    for report in analyze_path(path)? {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

/// Print the onset of a vocal take in seconds.
pub fn onset(file: &Path) -> Result<f64> {
    let buffer = decode_file(file)?;
    let onset = OnsetDetector::new().detect(&buffer);
    println!("{:.4}", onset);
    Ok(onset)
}

/// Print the alignment of an onset against a tempo.
pub fn align(tempo: f64, onset: f64, vocal_duration: Option<f64>) -> Result<PlaybackPlan> {
    if !tempo.is_finite() || tempo <= 0.0 {
        bail!("tempo must be a positive number of BPM, got {}", tempo);
    }
    let plan = AlignmentPlanner::new().plan(
        &AlignmentInputs {
            tempo: Some(tempo),
            downbeat_offset: None,
            onset: Some(onset),
            vocal_duration: vocal_duration.unwrap_or(f64::INFINITY),
        },
        0.0,
    );
    let report = serde_json::json!({
        "quantized_target": plan.alignment.quantized_target,
        "alignment_shift": plan.alignment.alignment_shift,
        "beat_start": plan.beat_start,
        "vocal_start": plan.vocal_start,
        "vocal_offset": plan.vocal_offset,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(plan)
}

/// Bounce the given tracks to a WAV file.
pub fn mix(options: &MixOptions) -> Result<EncodedMedia> {
    if options.beat.is_none() && options.vocal.is_none() {
        bail!("nothing to mix: pass --beat and/or --vocal");
    }

    let mut config = match &options.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if options.seed.is_some() {
        config.reverb_seed = options.seed;
    }
    if let Some(bit_depth) = options.bit_depth {
        config.export_bit_depth = bit_depth;
    }

    let params = match &options.params {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading params {}", path.display()))?;
            serde_json::from_str::<EffectParameters>(&contents)
                .with_context(|| format!("parsing params {}", path.display()))?
        }
        None => EffectParameters::default(),
    };

    let mut engine = EngineController::new(config)?.with_params(params);
    engine.initialize()?;

    if let Some(beat) = &options.beat {
        let bytes = std::fs::read(beat).with_context(|| format!("reading {}", beat.display()))?;
        let analysis = engine.load_beat(&bytes)?;
        info!(tempo = ?analysis.tempo, "Backing track ready");
    }
    if let Some(vocal) = &options.vocal {
        let bytes =
            std::fs::read(vocal).with_context(|| format!("reading {}", vocal.display()))?;
        let onset = engine.load_vocal(&bytes)?;
        info!(onset, "Vocal take ready");
    }

    let media = engine.export_mix()?;
    media
        .write_to(&options.out)
        .with_context(|| format!("writing {}", options.out.display()))?;
    engine.dispose();

    println!(
        "Wrote {} ({:.2} s, {} bytes, sha256 {})",
        options.out.display(),
        media.duration_secs,
        media.len(),
        media.checksum
    );
    Ok(media)
}
