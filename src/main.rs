use clap::{Parser, Subcommand};
use tracing::error;

use ceap_pipeline::apis::camara::CamaraApiClient;
use ceap_pipeline::config::Config;
use ceap_pipeline::dashboard::{self, DashboardState};
use ceap_pipeline::ingest::{IngestReport, Ingester, YearMonth};
use ceap_pipeline::logging;
use ceap_pipeline::observability;
use ceap_pipeline::process::{ProcessReport, Processor};
use ceap_pipeline::schema::PROCESSED_FILE_NAME;
use std::path::Path;

#[derive(Parser)]
#[command(name = "ceap-pipeline")]
#[command(about = "Expense data pipeline and dashboard for the Brazilian Chamber of Deputies")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect monthly expense records from the open-data API
    Ingest {
        /// First month to collect, as YYYY-MM
        #[arg(long, default_value = "2024-01")]
        start: String,
        /// Last month to collect (inclusive), as YYYY-MM
        #[arg(long, default_value = "2024-03")]
        end: String,
    },
    /// Normalize the raw monthly files into the canonical table
    Process,
    /// Serve the interactive dashboard
    Serve,
    /// Run ingestion and normalization sequentially
    Run {
        /// First month to collect, as YYYY-MM
        #[arg(long, default_value = "2024-01")]
        start: String,
        /// Last month to collect (inclusive), as YYYY-MM
        #[arg(long, default_value = "2024-03")]
        end: String,
    },
}

async fn run_ingest(
    config: &Config,
    start: &str,
    end: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = YearMonth::parse(start)?;
    let end = YearMonth::parse(end)?;
    let api = Box::new(CamaraApiClient::new(&config.api));
    let ingester = Ingester::new(api, &config.storage.raw_dir);
    let report = ingester.run(start, end).await?;
    print_ingest_report(&report);
    Ok(())
}

fn run_process(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let processor = Processor::new(&config.storage.raw_dir, &config.storage.processed_dir);
    let report = processor.run()?;
    print_process_report(&report);
    Ok(())
}

async fn serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    observability::init_metrics();
    let processed_file = Path::new(&config.storage.processed_dir).join(PROCESSED_FILE_NAME);
    let state = DashboardState::load(processed_file)?;
    dashboard::start_server(state, config.dashboard_port()).await
}

fn print_ingest_report(report: &IngestReport) {
    println!("\n📊 Ingest results (run {}):", report.run_id);
    println!("   Months covered: {}", report.months);
    println!("   Deputies listed: {}", report.deputies_listed);
    println!("   Records fetched: {}", report.records_fetched);
    println!("   Empty deputy/months: {}", report.empty_deputy_months);
    println!("   Failed requests: {}", report.failed_requests);
    println!("   Files written: {}", report.files_written.len());
    for file in &report.files_written {
        println!("   - {}", file);
    }
}

fn print_process_report(report: &ProcessReport) {
    println!("\n📊 Normalization results (run {}):", report.run_id);
    println!("   Files read: {}", report.files_read);
    println!("   Rows read: {}", report.rows_read);
    println!("   Dropped (bad date): {}", report.rows_dropped_bad_date);
    println!("   Dropped (malformed): {}", report.rows_dropped_malformed);
    println!("   Dropped (bad amount): {}", report.rows_dropped_bad_amount);
    println!("   Duplicates removed: {}", report.duplicates_removed);
    println!("   Rows written: {}", report.rows_written);
    if let Some(output) = &report.output_file {
        println!("   Output file: {}", output);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Ingest { start, end } => {
            println!("🔄 Running ingestion...");
            run_ingest(&config, &start, &end).await?;
        }
        Commands::Process => {
            println!("🔨 Running normalization...");
            run_process(&config)?;
        }
        Commands::Serve => {
            serve(&config).await?;
        }
        Commands::Run { start, end } => {
            println!("🚀 Running full pipeline (ingest + process)...");

            // Step 1: Run ingestion
            println!("\n📥 Step 1: Running ingestion...");
            if let Err(e) = run_ingest(&config, &start, &end).await {
                error!("Ingest run failed: {}", e);
                println!("❌ Ingest run failed: {}", e);
                return Err(e);
            }

            // Step 2: Run normalization
            println!("\n🔨 Step 2: Running normalization...");
            if let Err(e) = run_process(&config) {
                error!("Normalization run failed: {}", e);
                println!("❌ Normalization run failed: {}", e);
                return Err(e);
            }

            println!("✅ Full pipeline completed successfully!");
        }
    }
    Ok(())
}
