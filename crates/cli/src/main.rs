//! `fairvalue` - run one stock analysis job from the terminal.
//!
//! Prints progress to stderr while the job runs and the result JSON to
//! stdout when it completes. Ctrl-C cancels the job.

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use fairvalue_core::JobRequest;
use fairvalue_jobs::{JobController, JobsConfig, ProgressEvent, StartOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fairvalue")]
#[command(about = "Run a fair-value analysis and follow its progress", long_about = None)]
struct Args {
    /// Ticker symbol, e.g. AAPL or BRK.B
    ticker: String,

    /// Override the detected business classification (e.g. bank, reit)
    #[arg(long)]
    business_type: Option<String>,

    /// Override the valuation-model weighting scheme
    #[arg(long)]
    weighting: Option<String>,

    /// Ignore any cached result on the server
    #[arg(long)]
    force_refresh: bool,

    /// Fetch the result in one request without progress reporting
    #[arg(long)]
    no_progress: bool,

    /// Use the poll loop even when streaming is enabled in the environment
    #[arg(long)]
    poll: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fairvalue_jobs=info,fairvalue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = JobsConfig::from_env().context("Invalid configuration")?;
    if args.poll {
        config.streaming_enabled = false;
    }

    let mut request = JobRequest::for_ticker(&args.ticker)?.force_refresh(args.force_refresh);
    if let Some(business_type) = args.business_type {
        request = request.with_business_type(business_type)?;
    }
    if let Some(weighting) = args.weighting {
        request = request.with_weighting(weighting)?;
    }

    let controller = JobController::new(&config).context("Failed to build HTTP client")?;
    let options = if args.no_progress {
        StartOptions::without_progress()
    } else {
        StartOptions::default()
    };

    let mut subscription = controller.start(request, options);
    tracing::info!(
        subject = %subscription.subject(),
        job_id = %subscription.job_id(),
        "Analysis started",
    );

    loop {
        let event = tokio::select! {
            event = subscription.next_event() => event,
            _ = tokio::signal::ctrl_c() => {
                subscription.cancel();
                continue;
            }
        };

        match event {
            Some(ProgressEvent::Progress { step, total, label }) => {
                let label = label.as_deref().unwrap_or("working");
                match total {
                    Some(total) => eprintln!("[{step}/{total}] {label}"),
                    None => eprintln!("[{step}] {label}"),
                }
            }
            Some(ProgressEvent::Heartbeat { note: Some(note) }) => eprintln!("... {note}"),
            Some(ProgressEvent::Heartbeat { note: None }) => {}
            Some(ProgressEvent::Complete { result }) => {
                let pretty = serde_json::to_string_pretty(&result)?;
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{pretty}")?;
                return Ok(ExitCode::SUCCESS);
            }
            Some(ProgressEvent::Failed { error }) => {
                eprintln!("Analysis failed: {error}");
                return Ok(ExitCode::FAILURE);
            }
            Some(ProgressEvent::Cancelled) => {
                eprintln!("Analysis cancelled");
                return Ok(ExitCode::from(130));
            }
            None => return Ok(ExitCode::FAILURE),
        }
    }
}
