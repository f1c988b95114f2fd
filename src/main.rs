use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use concert_migrator::config::Config;
use concert_migrator::corrections::CorrectionMap;
use concert_migrator::db::{SqliteSource, SqliteStorage};
use concert_migrator::decision::{BatchDecider, ConsoleDecider, Decider};
use concert_migrator::logging;
use concert_migrator::oracle::build_oracle;
use concert_migrator::reconciler::{MigrationReport, Reconciler};
use concert_migrator::resolver::{Resolver, ResolverSettings};
use concert_migrator::storage::Storage;

#[derive(Parser)]
#[command(name = "concert_migrator")]
#[command(about = "Migrates legacy concert records into the normalized concert database")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate legacy records, resolving every referenced entity
    Migrate {
        /// Ask an operator instead of applying batch defaults
        #[arg(long)]
        interactive: bool,
        /// Consult the language-model oracle for multi-composer lines
        #[arg(long)]
        oracle: bool,
    },
    /// Migrate documents attached to already migrated records
    Documents,
    /// Migrate records, then documents
    Run {
        #[arg(long)]
        interactive: bool,
        #[arg(long)]
        oracle: bool,
    },
    /// Empty every destination table
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Derive the correction map from legacy values and merge it into the file
    GenerateCorrections,
}

fn print_report(title: &str, report: &MigrationReport) {
    println!("\n📊 {} (run {}):", title, report.run.id);
    println!("   Total: {}", report.total);
    println!("   Migrated: {}", report.migrated);
    println!("   Already present: {}", report.skipped_existing);
    if report.skipped_orphans > 0 {
        println!("   Orphaned: {}", report.skipped_orphans);
    }
    println!("   Failed: {}", report.failed);
    if report.failed > 0 {
        println!("\n⚠️  {} item(s) failed, see the log for details", report.failed);
    }
}

async fn migrate_records(
    config: &Config,
    reconciler: &Reconciler,
    storage: Arc<dyn Storage>,
    interactive: bool,
    use_oracle: bool,
) -> anyhow::Result<MigrationReport> {
    let corrections = CorrectionMap::load(&config.resolver.corrections_path);
    let decider: Box<dyn Decider> = if interactive {
        Box::new(ConsoleDecider::new())
    } else {
        Box::new(BatchDecider {
            allow_family_only: config.resolver.allow_family_only,
        })
    };
    let settings = ResolverSettings {
        min_name_length: config.resolver.min_name_length,
    };
    let oracle = build_oracle(&config.oracle, use_oracle);

    let mut resolver = Resolver::bootstrap(storage, corrections, decider, settings)
        .await
        .context("Failed to load existing destination entities")?;

    let report = reconciler.migrate_records(&mut resolver, oracle.as_deref()).await?;

    let stats = resolver.stats();
    println!("\n🧩 Entities:");
    for (category, created) in &stats.created {
        println!("   {} created: {}", category, created);
    }
    println!("   Placeholder works: {}", stats.placeholders);
    println!("   References skipped: {}", stats.skipped);

    Ok(report)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    let _guard = logging::init_logging(&config.logging.dir);
    match &config.loaded_from {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!(path = %cli.config.display(), "No config file, using defaults"),
    }

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&config.destination.path).context("Failed to open the destination database")?,
    );

    let source = Arc::new(
        SqliteSource::open(&config.source.path).context("Failed to open the legacy database")?,
    );
    let reconciler = Reconciler::new(storage.clone(), source);

    match cli.command {
        Commands::Migrate { interactive, oracle } => {
            println!("🔄 Migrating records...");
            let report = migrate_records(&config, &reconciler, storage, interactive, oracle).await?;
            print_report("Records", &report);
        }
        Commands::Documents => {
            println!("📎 Migrating documents...");
            let report = reconciler.migrate_documents().await?;
            print_report("Documents", &report);
        }
        Commands::Run { interactive, oracle } => {
            println!("🚀 Running full migration...");
            let records = migrate_records(&config, &reconciler, storage, interactive, oracle).await?;
            print_report("Records", &records);
            match reconciler.migrate_documents().await {
                Ok(documents) => print_report("Documents", &documents),
                Err(e) => {
                    error!("Document migration failed: {}", e);
                    println!("❌ Document migration failed: {}", e);
                }
            }
        }
        Commands::Clear { yes } => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt(format!(
                        "Delete every row in {}?",
                        config.destination.path.display()
                    ))
                    .default(false)
                    .interact()?;
            if !confirmed {
                println!("Aborted.");
                return Ok(());
            }
            println!("🧹 Clearing destination database...");
            reconciler.clear_destination().await?;
            println!("✅ Destination cleared");
        }
        Commands::GenerateCorrections => {
            println!("📝 Generating correction map...");
            let path = &config.resolver.corrections_path;
            let (map, added) = reconciler.generate_corrections(path).await?;
            if added == 0 {
                warn!("No new corrections found");
            }
            println!("✅ {} new entries, {} total, written to {}", added, map.len(), path.display());
        }
    }

    Ok(())
}
