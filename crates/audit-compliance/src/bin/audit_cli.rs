//! Command-line surface over the compliance reporter and export encoder,
//! for operators running reports outside the hosting application.

use audit_compliance::{export, CompressionKind, ExportFormat, ExportOptions};
use audit_compliance::report::{ComplianceReporter, ReportType};
use audit_core::config::Config;
use audit_storage::{client::EnhancedStorageClient, partition::PartitionManager, pool::ConnectionPool, ReportCriteria};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "audit-cli")]
#[command(about = "Generate and export audit compliance reports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a report and print it as JSON to stdout, or write an
    /// encoded export to --out.
    Report {
        #[arg(long, value_enum)]
        report_type: ReportTypeArg,
        #[arg(long)]
        organization_id: Option<String>,
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormatArg,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify stored events' hashes against their recomputed value.
    VerifyIntegrity {
        #[arg(long)]
        organization_id: Option<String>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum ReportTypeArg {
    Hipaa,
    Gdpr,
    General,
}

#[derive(Clone, clap::ValueEnum)]
enum ExportFormatArg {
    Json,
    Csv,
    Xml,
    Pdf,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(value: ExportFormatArg) -> Self {
        match value {
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Csv => ExportFormat::Csv,
            ExportFormatArg::Xml => ExportFormat::Xml,
            ExportFormatArg::Pdf => ExportFormat::Pdf,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = Config::load()?;

    let pool = ConnectionPool::new(&config.database, std::time::Duration::from_secs(10)).await?;
    let cache = audit_storage::QueryCache::new(&config.cache);
    let redis_client = redis::Client::open(config.cache.redis_url.clone())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let partitions = PartitionManager::new(
        pool.raw().clone(),
        redis_conn,
        "audit_log",
        config.partitioning.interval_days,
        config.partitioning.retention_days,
        config.partitioning.lock_ttl_seconds,
    );
    let storage = EnhancedStorageClient::new(pool, cache, None, partitions, &config);
    let reporter = ComplianceReporter::new(&storage);

    match cli.command {
        Commands::Report { report_type, organization_id, format, out } => {
            let criteria = ReportCriteria { organization_ids: organization_id.into_iter().collect(), ..Default::default() };

            let report = match report_type {
                ReportTypeArg::Hipaa => reporter.generate_hipaa_report(&criteria).await?,
                ReportTypeArg::Gdpr => reporter.generate_gdpr_report(&criteria).await?,
                ReportTypeArg::General => reporter.generate_compliance_report(&criteria, ReportType::General).await?,
            };

            let options = ExportOptions { format: format.into(), ..Default::default() };
            let result = export(&report, &options)?;

            match out {
                Some(path) => {
                    std::fs::write(&path, &result.data)?;
                    println!("wrote {} bytes to {} (checksum {})", result.size, path.display(), result.checksum);
                }
                None => {
                    std::io::Write::write_all(&mut std::io::stdout(), &result.data)?;
                }
            }
        }
        Commands::VerifyIntegrity { organization_id } => {
            let criteria = ReportCriteria { organization_ids: organization_id.into_iter().collect(), ..Default::default() };
            let report = reporter.generate_integrity_verification_report(&criteria, true).await?;
            println!(
                "verified {}/{} events ({:.2}% pass rate), {} failures",
                report.results.verified_events,
                report.results.total_events,
                report.results.verification_rate * 100.0,
                report.results.failed_verifications
            );
        }
    }

    Ok(())
}
