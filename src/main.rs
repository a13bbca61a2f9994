mod cleanup;
mod client;
mod config;
mod executor;
mod graph;
mod injection;
mod loader;
mod protocol;
mod report;
mod validators;

use clap::{Parser, Subcommand};
use client::{AwsCliState, McpClient};
use config::HarnessConfig;
use executor::Executor;
use protocol::CaseStatus;
use report::{ReportFormat, ReportGenerator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Integration-test harness for the AWS data-processing MCP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executes a test suite against the MCP server
    Execute {
        /// Path to the suite JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Directory for generated reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Report formats (json, markdown)
        #[arg(long, value_delimiter = ',', default_values_t = vec!["json".to_string(), "markdown".to_string()])]
        formats: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Execute {
            file,
            output_dir,
            formats,
        } => {
            let exit_code = execute_suite(file, output_dir.as_deref(), formats).await;
            std::process::exit(exit_code);
        }
    }
}

async fn execute_suite(
    file: &std::path::Path,
    output_dir: Option<&std::path::Path>,
    formats: &[String],
) -> i32 {
    println!("🚀 Harness initializing...");
    let config = HarnessConfig::from_env();

    let formats: Vec<ReportFormat> = match formats
        .iter()
        .map(|f| ReportFormat::parse(f).ok_or_else(|| f.clone()))
        .collect()
    {
        Ok(formats) => formats,
        Err(unknown) => {
            eprintln!("❌ Unknown report format: {unknown}");
            return 2;
        }
    };

    let suite = match loader::load_suite_from_file(file) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("❌ Failed to load suite: {e:#}");
            return 2;
        }
    };
    println!(
        "📋 Suite loaded: {} ({} cases)",
        suite.meta.name,
        suite.cases.len()
    );

    let mcp = match McpClient::spawn(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("❌ Failed to start MCP server: {e:#}");
            return 2;
        }
    };
    if let Err(e) = mcp.initialize().await {
        eprintln!("❌ MCP handshake failed: {e:#}");
        return 2;
    }
    println!("🔌 MCP server ready");

    let state = Arc::new(AwsCliState::new(&config));
    let executor = match Executor::new(suite, mcp, state, config.clone()) {
        Ok(executor) => executor,
        Err(e) => {
            eprintln!("❌ Invalid dependency graph: {e}");
            return 2;
        }
    };

    println!("▶️  Starting execution...");
    let report = executor.run().await;

    for result in &report.results {
        let (icon, label) = match result.status {
            CaseStatus::Passed => ("✅", "PASS"),
            CaseStatus::Failed => ("❌", "FAIL"),
            CaseStatus::Skipped => ("⏭️ ", "SKIP"),
        };
        let detail = result
            .error
            .clone()
            .or_else(|| {
                result
                    .validations
                    .iter()
                    .find(|v| !v.success)
                    .map(|v| v.message.clone())
            })
            .map(|d| format!(" ({d})"))
            .unwrap_or_default();
        println!(
            "   {icon} {label} {} [{}ms]{detail}",
            result.test_name, result.duration_ms
        );
    }

    println!(
        "🏁 Finished: {}/{} passed ({:.1}%)",
        report.summary.passed, report.summary.total, report.summary.success_rate
    );

    let generator = ReportGenerator::new(output_dir.unwrap_or(&config.report_dir));
    match generator.generate(&report, &formats) {
        Ok(written) => {
            for path in written.values() {
                println!("📄 Report saved to: {}", path.display());
            }
        }
        Err(e) => eprintln!("❌ Failed to write reports: {e:#}"),
    }

    if report.summary.failed == 0 {
        0
    } else {
        1
    }
}
