use anyhow::{Context, Result};
use clap::Parser;
use pulsespeed::app::{App, ChannelCallbacks, TestUpdate};
use pulsespeed::{Settings, SpeedTest, SpeedTestError, SpeedTestResult, TestPhase};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pulsespeed",
    version,
    about = "Measure latency, jitter, download and upload speed"
)]
struct Args {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the measurement service base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Print the final result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(base_url) = args.base_url {
        settings.base_url = base_url;
    }

    let engine = Arc::new(SpeedTest::new(settings)?);
    run_app(engine, args.json).await
}

async fn run_app(engine: Arc<SpeedTest>, json: bool) -> Result<()> {
    let mut app = App::new();
    app.reset_for_new_test();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = engine.clone();
    let mut handle = tokio::spawn(async move {
        let callbacks = ChannelCallbacks::new(tx);
        runner.run(&callbacks).await
    });

    let outcome = loop {
        tokio::select! {
            Some(update) = rx.recv() => apply_update(&mut app, update, json),
            _ = tokio::signal::ctrl_c() => {
                engine.abort();
            }
            joined = &mut handle => {
                break joined.context("speed test task failed")?;
            }
        }
    };

    // Updates sent just before the task finished
    while let Ok(update) = rx.try_recv() {
        apply_update(&mut app, update, json);
    }

    let result = match outcome {
        Ok(result) => result,
        Err(SpeedTestError::Aborted) => {
            if !json {
                println!("aborted");
            }
            return Ok(());
        }
        Err(error) if error.is_rate_limited() => {
            return Err(error)
                .context("the speed test service is rate limiting requests, try again in a minute");
        }
        Err(error) => return Err(error.into()),
    };
    app.complete_test(result.clone());

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn apply_update(app: &mut App, update: TestUpdate, json: bool) {
    let summary = match &update {
        TestUpdate::PhaseComplete { phase, value } => Some(summary_line(*phase, *value)),
        _ => None,
    };
    let is_progress = matches!(update, TestUpdate::Progress { .. });
    app.handle_update(update);
    if json {
        return;
    }
    if let Some(line) = summary {
        println!("{line}");
    } else if is_progress {
        println!("{}", app.status_line());
    }
}

fn summary_line(phase: TestPhase, value: f64) -> String {
    match phase {
        TestPhase::Ping => format!("{phase:<8} done    {} ms", value.round()),
        _ => format!("{phase:<8} done    {value:.2} Mbps"),
    }
}

fn print_result(result: &SpeedTestResult) {
    println!();
    println!("Server:    {}", result.server_name);
    println!("Ping:      {} ms", result.ping_ms);
    println!("Latency:   {} ms", result.latency_ms);
    println!("Jitter:    {:.1} ms", result.jitter_ms);
    println!("Download:  {:.2} Mbps", result.download_mbps);
    println!("Upload:    {:.2} Mbps", result.upload_mbps);
}
