//! Terminal client: upload a plant photo and wait for its diagnosis.
//!
//! Usage:
//!   analyze leaf.jpg
//!   analyze --server http://localhost:3000 leaf.png

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use leafscan::client::{AnalysisClient, ImageFile, PollConfig, PollObserver, Poller, PollerState};
use leafscan::models::analysis::{AnalysisResult, ConfidenceBand};
use leafscan::models::job::JobId;

#[derive(Parser)]
#[command(name = "analyze", version, about = "Detect plant diseases in a photo")]
struct Args {
    /// Image to analyze (JPEG, PNG or WebP, at most 5MB)
    image: PathBuf,

    /// Base URL of the analysis server
    #[arg(long, env = "LEAFSCAN_URL", default_value = "http://localhost:3000")]
    server: String,

    /// Seconds between status checks
    #[arg(long, default_value = "0.5", value_parser = parse_interval)]
    interval: Duration,

    /// Status checks before giving up
    #[arg(long, default_value_t = 120)]
    attempts: u32,
}

const MIN_INTERVAL: Duration = Duration::from_millis(50);

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("`{}` is not a number of seconds", raw))?;
    let interval = Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("`{}` is not a usable interval", raw))?;
    Ok(interval.max(MIN_INTERVAL))
}

/// Prints state changes and keeps the ctrl-c handler informed.
struct TerminalObserver {
    polling: Arc<AtomicBool>,
}

impl PollObserver for TerminalObserver {
    fn on_state(&mut self, state: &PollerState) {
        self.polling.store(state.warn_on_leave(), Ordering::SeqCst);
        match state {
            PollerState::Submitting => println!("Uploading image..."),
            PollerState::Polling { job_id, .. } => {
                println!("Analysis #{} started, waiting for the result...", job_id)
            }
            _ => {}
        }
    }

    fn on_progress(&mut self, job_id: JobId, elapsed: Duration) {
        println!("  still analyzing #{} ({}s)", job_id, elapsed.as_secs());
    }
}

fn band_label(band: ConfidenceBand) -> &'static str {
    match band {
        ConfidenceBand::High => "high",
        ConfidenceBand::Moderate => "moderate",
        ConfidenceBand::Low => "low",
    }
}

fn print_result(result: &AnalysisResult) {
    println!();
    println!("Plant: {}", result.subject);

    let Some(primary) = result.primary() else {
        println!("No findings reported.");
        return;
    };
    println!(
        "Primary diagnosis: {} ({}, {} confidence)",
        primary.label,
        primary.confidence_percent(),
        band_label(primary.band())
    );
    println!("Recommended treatment: {}", primary.remedy);

    let alternatives = result.alternatives();
    if !alternatives.is_empty() {
        println!();
        println!("Other possibilities:");
        for finding in alternatives {
            println!("  - {} ({})", finding.label, finding.confidence_percent());
            if !finding.remedy.is_empty() {
                println!("    {}", finding.remedy);
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let image = match ImageFile::load(&args.image).await {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };
    println!("{} ({})", image.file_name, image.size_label());

    let polling = Arc::new(AtomicBool::new(false));
    let watcher = Arc::clone(&polling);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if watcher.load(Ordering::SeqCst) {
                eprintln!("\nStopped waiting. The analysis keeps running on the server.");
            }
            std::process::exit(130);
        }
    });

    let config = PollConfig {
        interval: args.interval,
        max_attempts: args.attempts.max(1),
        ..PollConfig::default()
    };
    let client = AnalysisClient::new(&args.server);
    let mut poller = Poller::new(config);
    let mut observer = TerminalObserver { polling };

    let outcome = match poller.run(&client, &image, &mut observer).await {
        Ok(state) => state.clone(),
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        PollerState::Completed { result, .. } => {
            print_result(&result);
            ExitCode::SUCCESS
        }
        PollerState::Failed { error, .. } => {
            eprintln!("Analysis failed: {}", error);
            ExitCode::FAILURE
        }
        PollerState::TimedOut { job_id } => {
            println!(
                "Analysis #{} is still processing after {}s. Check again later.",
                job_id,
                config.timeout().as_secs()
            );
            ExitCode::from(3)
        }
        other => {
            eprintln!("Unexpected client state: {:?}", other);
            ExitCode::FAILURE
        }
    }
}
