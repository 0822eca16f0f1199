use std::path::PathBuf;
use std::time::Duration;

use livefx_common::config::{ChannelMode, Config, RenderKind, SourceKind};
use livefx_common::source::FrameSource;
use livefx_pipeline::channel::{ChannelTimeouts, ExecutionChannel, InlineChannel, WorkerChannel};
use livefx_pipeline::control::{ControlEvent, ControlParseError};
use livefx_pipeline::engine::cpu_engine_factory;
use livefx_pipeline::render::{NullRenderer, Renderer, SnapshotRenderer};
use livefx_pipeline::state::{Pipeline, PipelineReport, PipelineSettings};
use livefx_source::{MjpegSource, SyntheticSource};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

enum Command {
    Control(ControlEvent),
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, ControlParseError> {
    match line.trim() {
        "" => Ok(None),
        "quit" | "exit" => Ok(Some(Command::Quit)),
        "status" => Ok(Some(Command::Status)),
        other => other.parse().map(|event| Some(Command::Control(event))),
    }
}

/// Forward stdin lines as commands until EOF or the receiver goes away.
async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, no more commands");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                return;
            }
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                if tx.send(cmd).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(input = line.trim(), error = %e, "ignoring command"),
        }
    }
}

fn log_report(report: &PipelineReport) {
    match report {
        PipelineReport::FrameFailed { seq, reason } => warn!(seq, %reason, "frame failed"),
        PipelineReport::RestartsExhausted { attempts } => {
            error!(attempts, "pipeline gave up restarting; type 'start' to retry")
        }
        PipelineReport::AcquisitionFailed(e) => error!(error = %e, "could not acquire frames"),
        other => info!(report = ?other, "pipeline report"),
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = ?config.source.kind,
        channel = ?config.channel.mode,
        render = ?config.render.kind,
        refresh_hz = config.pipeline.refresh_hz,
        filter = %config.filter.initial,
        "starting livefx"
    );

    let source: Box<dyn FrameSource> = match config.source.kind {
        SourceKind::Synthetic => Box::new(SyntheticSource::new()),
        SourceKind::Mjpeg => Box::new(MjpegSource::new(config.source.url.clone())),
    };

    let channel: Box<dyn ExecutionChannel> = match config.channel.mode {
        ChannelMode::Inline => Box::new(InlineChannel::new(cpu_engine_factory())),
        ChannelMode::Worker => Box::new(WorkerChannel::new(
            cpu_engine_factory(),
            ChannelTimeouts {
                init: config.channel.init_timeout(),
                process: config.channel.process_timeout(),
            },
        )),
    };

    let renderer: Box<dyn Renderer> = match config.render.kind {
        RenderKind::Null => Box::new(NullRenderer::new()),
        RenderKind::Snapshot => {
            match SnapshotRenderer::new(&config.render.snapshot_dir, config.render.snapshot_every) {
                Ok(r) => Box::new(r),
                Err(e) => {
                    error!(error = %e, "failed to set up snapshot renderer");
                    std::process::exit(1);
                }
            }
        }
    };

    let mut pipeline = Pipeline::new(
        source,
        channel,
        renderer,
        config.filter.to_filter_config(),
        PipelineSettings::from_config(&config),
    );

    let (tx, mut commands) = mpsc::channel(32);
    tokio::spawn(read_commands(tx));

    if let Err(e) = pipeline.start() {
        error!(error = %e, "pipeline failed to start; type 'start' to retry");
    }

    let mut ticker = tokio::time::interval(config.pipeline.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_timer =
        tokio::time::interval(Duration::from_secs(config.pipeline.status_interval_secs));
    status_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                pipeline.tick();
                for report in pipeline.drain_reports() {
                    log_report(&report);
                }
            }
            _ = status_timer.tick() => {
                let status = pipeline.status();
                info!(
                    state = ?status.state,
                    channel = ?status.channel_state,
                    filter = %status.config.filter,
                    brightness = status.config.brightness,
                    rendered = status.rendered,
                    submitted = status.stats.submitted,
                    skipped_busy = status.stats.skipped_busy,
                    failed = status.stats.failed,
                    restarts = status.restarts,
                    "status"
                );
            }
            Some(cmd) = commands.recv() => match cmd {
                Command::Control(event) => {
                    if let Err(e) = pipeline.handle_control(event) {
                        warn!(?event, error = %e, "control event rejected");
                    }
                }
                Command::Status => {
                    let status = pipeline.status();
                    info!(?status, "status requested");
                }
                Command::Quit => break,
            },
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
    }

    pipeline.shutdown();
    info!(restarts = pipeline.status().restarts, "livefx stopped");
}
