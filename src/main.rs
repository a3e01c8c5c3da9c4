//! Competitor radar: weekly batch entrypoint.
//! Collects evidence, assembles and validates the report, writes it to
//! disk, mails it, then records delivered URLs in the weekly ledger.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use competitor_radar::config::{ProviderKind, RadarConfig};
use competitor_radar::evidence::{EvidenceProvider, GroundedProvider, NewsSearchProvider, SerperNewsClient};
use competitor_radar::ledger::{FileLedgerStore, LedgerStore};
use competitor_radar::notify::{EmailSender, ReportSink};
use competitor_radar::oracle::{DynOracle, GeminiOracle};
use competitor_radar::pipeline::{self, RunContext};
use competitor_radar::probe::UrlProber;

const ENV_DRY_RUN: &str = "RADAR_DRY_RUN";
const ENV_REPORT_DATE: &str = "RADAR_REPORT_DATE";
const ENV_OUT_DIR: &str = "RADAR_OUT_DIR";

/// RUST_LOG wins; RADAR_LOG_JSON=1 switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("competitor_radar=info,warn"));
    let json = std::env::var("RADAR_LOG_JSON").is_ok_and(|v| v == "1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn report_date() -> Result<NaiveDate> {
    match std::env::var(ENV_REPORT_DATE) {
        Ok(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("{ENV_REPORT_DATE} must be YYYY-MM-DD, got {raw}")),
        Err(_) => Ok(Local::now().date_naive()),
    }
}

fn build_provider(config: &RadarConfig, oracle: &DynOracle) -> Result<Box<dyn EvidenceProvider>> {
    Ok(match config.provider.kind {
        ProviderKind::Grounded => Box::new(GroundedProvider::new(Arc::clone(oracle))),
        ProviderKind::NewsSearch => {
            let client = SerperNewsClient::new(config.news_search.api_key.clone())?;
            Box::new(NewsSearchProvider::new(Arc::new(client)).with_discovery(Arc::clone(oracle)))
        }
    })
}

async fn write_report(dir: &str, assembled: &pipeline::AssembledReport) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating output dir {dir}"))?;
    let path = PathBuf::from(dir).join(format!("report-{}.json", assembled.report.report_date));
    let json = serde_json::to_string_pretty(&assembled.report).context("serializing report")?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_tracing();
    competitor_radar::metrics::describe();

    let config = RadarConfig::load_default()?;
    let date = report_date()?;
    let dry_run = std::env::var(ENV_DRY_RUN).is_ok_and(|v| v == "1");
    let out_dir = std::env::var(ENV_OUT_DIR).unwrap_or_else(|_| "out".to_string());

    let oracle: DynOracle = Arc::new(GeminiOracle::new(
        config.provider.api_key.clone(),
        config.provider.model.clone(),
    )?);
    let provider = build_provider(&config, &oracle)?;
    let prober = UrlProber::new(config.probe.clone())?;
    let store = FileLedgerStore::new(&config.ledger.path);
    let history = store.load().await;

    tracing::info!(%date, provider = provider.name(), dry_run, "radar run starting");
    let ctx = RunContext {
        config: &config,
        oracle,
        provider: provider.as_ref(),
        links: &prober,
    };
    let assembled = pipeline::run(&ctx, date, &history).await?;
    let path = write_report(&out_dir, &assembled).await?;
    tracing::info!(path = %path.display(), counters = ?assembled.counters, "report written");

    let sink: Box<dyn ReportSink> = if dry_run {
        Box::new(NoSink)
    } else {
        Box::new(EmailSender::from_env()?)
    };
    let delivered = pipeline::deliver_and_commit(
        &assembled,
        sink.as_ref(),
        &store,
        history,
        date,
        config.ledger.keep_weeks,
        dry_run,
    )
    .await?;
    tracing::info!(delivered, "radar run finished");
    Ok(())
}

/// Stands in for the mailer on dry runs, where no SMTP settings are needed.
struct NoSink;

#[async_trait::async_trait]
impl ReportSink for NoSink {
    async fn deliver(
        &self,
        _report: &competitor_radar::WeeklyReport,
        _counters: &competitor_radar::RunCounters,
    ) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
