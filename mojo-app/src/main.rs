//! `mojo-render`: drives `EffectProcessor` block by block over a WAV file,
//! the way an audio host would, and reports the engine's diagnostics.

mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use mojo_core::{
    DiagnosticsSnapshot, EffectParams, EffectProcessor, EngineStatus, InferenceEngine,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use settings::{default_settings_path, load_settings, save_settings, AppSettings};

#[derive(Debug, Default)]
struct Args {
    input: PathBuf,
    output: PathBuf,
    model: Option<PathBuf>,
    settings: Option<PathBuf>,
    block: Option<usize>,
    realtime: bool,
    save_settings: bool,
}

const USAGE: &str = "Usage: mojo-render --input <in.wav> --output <out.wav> \\
  [--model <path>] [--settings <settings.json>] [--block <n>] [--realtime] [--save-settings]";

fn parse_args() -> Result<Args> {
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut args = Args::default();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--input" | "-i" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --input");
                };
                input = Some(PathBuf::from(v));
            }
            "--output" | "-o" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --output");
                };
                output = Some(PathBuf::from(v));
            }
            "--model" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --model");
                };
                args.model = Some(PathBuf::from(v));
            }
            "--settings" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --settings");
                };
                args.settings = Some(PathBuf::from(v));
            }
            "--block" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --block");
                };
                args.block = Some(
                    v.parse::<usize>()
                        .with_context(|| format!("invalid value for --block: {v}"))?,
                );
            }
            "--realtime" => args.realtime = true,
            "--save-settings" => args.save_settings = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}\n{USAGE}"),
        }
    }

    args.input = input.with_context(|| format!("--input is required\n{USAGE}"))?;
    args.output = output.with_context(|| format!("--output is required\n{USAGE}"))?;
    Ok(args)
}

/// Planar audio read from disk.
struct Decoded {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

fn read_wav(path: &Path) -> Result<Decoded> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channel_count = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("decoding float samples")?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .context("decoding integer samples")?
        }
    };

    let frames = interleaved.len() / channel_count;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    Ok(Decoded {
        channels,
        sample_rate: spec.sample_rate,
    })
}

fn write_wav(path: &Path, channels: &[Vec<f32>], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: u16::try_from(channels.len()).context("too many channels")?,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;

    let frames = channels.first().map_or(0, Vec::len);
    for i in 0..frames {
        for channel in channels {
            writer.write_sample(channel[i])?;
        }
    }
    writer.finalize().context("finalizing output wav")?;
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderSummary {
    input: String,
    output: String,
    frames: usize,
    channels: usize,
    block_size: usize,
    realtime: bool,
    final_status: EngineStatus,
    elapsed_ms: f64,
    diagnostics: DiagnosticsSnapshot,
}

fn run() -> Result<()> {
    let args = parse_args()?;

    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut app_settings: AppSettings = load_settings(&settings_path);
    if let Some(model) = args.model.clone() {
        app_settings.model_path = Some(model);
    }
    if let Some(block) = args.block {
        app_settings.block_size = block;
    }
    app_settings.normalize();
    info!(
        settings_path = ?settings_path,
        block_size = app_settings.block_size,
        model = ?app_settings.model_path,
        "render settings loaded"
    );

    if args.save_settings {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("saving {}", settings_path.display()))?;
        info!(settings_path = ?settings_path, "settings saved");
    }

    let Decoded {
        mut channels,
        sample_rate,
    } = read_wav(&args.input)?;
    let frames = channels.first().map_or(0, Vec::len);
    info!(
        frames,
        channels = channels.len(),
        sample_rate,
        "input decoded"
    );

    // ── Engine setup ──────────────────────────────────────────────────────
    let engine = InferenceEngine::with_default_loader(app_settings.engine.clone())?;
    let controller = engine.controller();

    let mut status_rx = controller.subscribe_status();
    let status_logger = thread::Builder::new()
        .name("mojo-status".into())
        .spawn(move || loop {
            match status_rx.blocking_recv() {
                Ok(event) => info!(status = ?event.status, detail = ?event.detail, "engine status"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status events lagged"),
                Err(RecvError::Closed) => break,
            }
        })
        .context("spawning status logger")?;

    if let Some(model) = app_settings.model_path.as_deref() {
        if let Err(e) = controller.load_model(model) {
            warn!(error = %e, "model unavailable, rendering in passthrough");
        }
    }

    let params = Arc::new(EffectParams::from_settings(app_settings.gains));
    let mut processor =
        EffectProcessor::new(engine, app_settings.engine.output_capacity, params)?;
    processor.prepare(app_settings.block_size);

    // ── Render loop ───────────────────────────────────────────────────────
    let block_size = app_settings.block_size;
    let block_duration = Duration::from_secs_f64(block_size as f64 / f64::from(sample_rate.max(1)));
    let started = Instant::now();
    let mut next_deadline = started;

    let mut offset = 0;
    while offset < frames {
        let end = (offset + block_size).min(frames);
        let mut block: Vec<&mut [f32]> = channels
            .iter_mut()
            .map(|c| &mut c[offset..end])
            .collect();
        processor.process_block(&mut block);
        offset = end;

        if args.realtime {
            next_deadline += block_duration;
            if let Some(remaining) = next_deadline.checked_duration_since(Instant::now()) {
                thread::sleep(remaining);
            }
        }
    }
    let elapsed = started.elapsed();

    let diagnostics = processor.engine().diagnostics();
    drop(processor);
    let final_status = controller.status();
    drop(controller);
    if status_logger.join().is_err() {
        warn!("status logger panicked");
    }

    write_wav(&args.output, &channels, sample_rate)?;
    info!(output = ?args.output, "render complete");

    let summary = RenderSummary {
        input: args.input.display().to_string(),
        output: args.output.display().to_string(),
        frames,
        channels: channels.len(),
        block_size,
        realtime: args.realtime,
        final_status,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        diagnostics,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("mojo_core=info,mojo_render=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("mojo-render failed: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trip_deinterleaves_channels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stereo.wav");

        let left: Vec<f32> = (0..32).map(|i| i as f32 / 64.0).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        write_wav(&path, &[left.clone(), right.clone()], 48_000).expect("write wav");

        let decoded = read_wav(&path).expect("read wav");
        assert_eq!(decoded.sample_rate, 48_000);
        assert_eq!(decoded.channels.len(), 2);
        assert_eq!(decoded.channels[0], left);
        assert_eq!(decoded.channels[1], right);
    }

    #[test]
    fn integer_wav_is_scaled_to_unit_range() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mono16.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        writer.write_sample(16_384_i16).expect("write");
        writer.write_sample(-32_768_i16).expect("write");
        writer.finalize().expect("finalize");

        let decoded = read_wav(&path).expect("read wav");
        assert_eq!(decoded.channels[0], vec![0.5, -1.0]);
    }
}
