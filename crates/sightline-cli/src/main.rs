mod overlay;
mod source;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sightline_pipeline::{doctor, AssetsConfig, Pipeline, PipelineConfig};
use sightline_vision::{InferenceEngine, LabelTable};

use overlay::{Overlay, OverlayConfig};
use source::{FrameSource, SourceConfig, POOL_BUFFERS};

#[cfg(feature = "engine-tflite")]
use sightline_vision::TfliteEngine;

#[derive(Debug, Parser)]
#[command(name = "sightline", version, about = "Sightline - live camera detection overlay pipeline")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate config and assets without starting the pipeline.
    Doctor,
    /// Print the model's input/output tensors.
    Inspect,
    Run {
        /// Stop after submitting this many frames.
        #[arg(long)]
        max_frames: Option<u64>,
    },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    pipeline: PipelineConfig,
    assets: AssetsConfig,
    source: SourceConfig,
    overlay: OverlayConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor_cmd(&cfg)?,
        Command::Inspect => inspect(&cfg)?,
        Command::Run { max_frames } => run(&cfg, max_frames).await?,
    }
    Ok(())
}

fn doctor_cmd(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    doctor::check_pipeline(&cfg.pipeline)?;
    doctor::check_assets(&cfg.assets)?;
    cfg.source.check()?;
    cfg.overlay.check()?;
    if cfg!(not(feature = "engine-tflite")) {
        warn!("doctor: built without an inference engine; `run` will refuse to start");
    }
    info!("doctor: OK");
    Ok(())
}

fn inspect(cfg: &Config) -> Result<()> {
    #[cfg(not(feature = "engine-tflite"))]
    {
        let _ = cfg;
        anyhow::bail!("no inference engine available; build with --features engine-tflite");
    }

    #[cfg(feature = "engine-tflite")]
    {
        let engine = TfliteEngine::load(&cfg.assets.model_path, cfg.assets.threads)?;
        print!("{}", engine.inspect());
        Ok(())
    }
}

fn init_engine(assets: &AssetsConfig) -> Result<Box<dyn InferenceEngine>> {
    sightline_vision::check_model_file(&assets.model_path)?;

    #[cfg(not(feature = "engine-tflite"))]
    {
        anyhow::bail!("binary not built with --features engine-tflite");
    }

    #[cfg(feature = "engine-tflite")]
    {
        let engine = TfliteEngine::load(&assets.model_path, assets.threads)?;
        Ok(Box::new(engine))
    }
}

async fn run(cfg: &Config, max_frames: Option<u64>) -> Result<()> {
    info!("run: starting");

    let labels = LabelTable::load(&cfg.assets.labels_path)?;
    let engine = init_engine(&cfg.assets).context("engine init")?;
    let (pipeline, mut batches) =
        Pipeline::start(cfg.pipeline.clone(), engine, labels).context("pipeline start")?;

    let mut source = FrameSource::open(&cfg.source)?;
    let mut overlay = Overlay::open(&cfg.overlay).await?;

    let mut tick = tokio::time::interval(Duration::from_secs_f64(1.0 / cfg.source.fps as f64));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut submitted = 0u64;
    loop {
        if max_frames.is_some_and(|max| submitted >= max) {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("run: interrupted");
                break;
            }
            _ = tick.tick() => {
                match source.next_frame() {
                    Some(frame) => {
                        pipeline.submit(frame);
                        submitted += 1;
                    }
                    None => warn!("run: all {} capture buffers in use; frame skipped", POOL_BUFFERS),
                }
            }
            Some(batch) = batches.next() => {
                if let Err(e) = overlay.draw(&batch).await {
                    warn!("overlay: {:#}", e);
                }
            }
        }
    }

    // Give the final frame a chance to reach the overlay.
    if max_frames.is_some() && submitted > 0 {
        let last = submitted;
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(batch) = batches.next().await {
                overlay.draw(&batch).await?;
                if batch.sequence >= last {
                    break;
                }
            }
            Ok::<(), anyhow::Error>(())
        })
        .await;
        match drained {
            Ok(result) => result?,
            Err(_) => warn!("run: final frame did not complete in time"),
        }
    }

    let stats = tokio::task::spawn_blocking(move || pipeline.join())
        .await
        .context("join pipeline")?;
    info!(
        "run: done (submitted {}, processed {}, published {}, capture buffers outstanding {})",
        stats.submitted,
        stats.processed,
        stats.published,
        source.outstanding()
    );
    Ok(())
}
