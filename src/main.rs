//! news-ingest binary entrypoint.
//! One batch run: fetch every configured category, analyze new entries, write survivors.
//!
//! Usage: `news-ingest [CATEGORY ...]` (no arguments = every category).
//! Exit code: 0 completed, 1 run-level failure, 130 cancelled.

use std::process::ExitCode;

use news_ingest::config::Settings;
use news_ingest::metrics::Metrics;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` wins; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("news_ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = ?e, "invalid settings");
            return ExitCode::from(1);
        }
    };
    let pipeline = match news_ingest::build_pipeline(&settings).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = ?e, "startup failed");
            return ExitCode::from(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let categories: Vec<String> = std::env::args().skip(1).collect();
    let code = match pipeline.run_once(&categories, shutdown_rx).await {
        Ok(summary) if summary.cancelled => {
            println!("{summary}");
            ExitCode::from(130)
        }
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::from(1)
        }
    };

    if let (Some(m), Some(path)) = (metrics.as_ref(), settings.metrics_textfile.as_deref()) {
        if let Err(e) = m.write_textfile(path) {
            tracing::warn!(error = ?e, "could not write metrics textfile");
        }
    }
    code
}
