use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use medscore_guard::error::{ErrorClassifier, Failure};
use medscore_guard::logging::{
    load_audit_entries, load_rolling_entries, FlushOutcome, LogEntry, LogLevel, MaskingRule, SqliteStore,
};
use medscore_guard::{telemetry, GuardConfig, GuardRuntime};
use std::io::{self, Read};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "medscore-guard")]
#[command(about = "Failure classification and audit-log tooling for medical scoring forms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true, env = "MEDSCORE_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit diagnostics as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a failure message
    Classify {
        /// Failure message
        message: String,

        /// Machine-readable error code (e.g. ENOTFOUND)
        #[arg(long)]
        code: Option<String>,

        /// Stack trace text
        #[arg(long)]
        stack: Option<String>,
    },

    /// Mask personal data in a JSON document (reads stdin when no input is given)
    Anonymize {
        /// JSON document
        input: Option<String>,

        /// Keep this many trailing characters of masked values
        #[arg(long)]
        keep_last: Option<usize>,
    },

    /// Show entries persisted under the rolling log key
    Logs {
        /// Only show entries at this level
        #[arg(short, long)]
        level: Option<String>,

        /// Show at most this many of the most recent entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show persisted audit entries
    Audits {
        /// Only entries for this calculator
        #[arg(long)]
        calculator: Option<String>,

        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Queue persisted entries again and send them to the remote endpoint
    Replay,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing(cli.debug, cli.json_logs)?;

    let config = GuardConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match &cli.command {
        Commands::Classify { message, code, stack } => {
            classify(message, code.as_deref(), stack.as_deref());
        }
        Commands::Anonymize { input, keep_last } => {
            anonymize(&config, input.as_deref(), *keep_last)?;
        }
        Commands::Logs { level, limit, json } => {
            show_logs(&config, level.as_deref(), *limit, *json)?;
        }
        Commands::Audits { calculator, json } => {
            show_audits(&config, calculator.as_deref(), *json)?;
        }
        Commands::Replay => {
            replay(config).await?;
        }
    }

    Ok(())
}

fn classify(message: &str, code: Option<&str>, stack: Option<&str>) {
    let mut failure = Failure::new(message);
    if let Some(code) = code {
        failure = failure.with_code(code);
    }
    if let Some(stack) = stack {
        failure = failure.with_stack_trace(stack);
    }

    let classification = ErrorClassifier::new().classify(&failure);
    let recoverable = if classification.recoverable {
        "recoverable".green()
    } else {
        "not recoverable".red()
    };

    println!("{} {}", "Kind:".bold(), classification.kind.to_string().cyan());
    println!("{} {}", "Status:".bold(), recoverable);
    println!("{} {}", "Meaning:".bold(), classification.kind.description());
}

fn anonymize(config: &GuardConfig, input: Option<&str>, keep_last: Option<usize>) -> Result<()> {
    let text = match input {
        Some(text) => text.to_string(),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read JSON from stdin")?;
            buf
        }
    };

    let details: serde_json::Value = serde_json::from_str(&text).context("Input is not valid JSON")?;

    let mut anonymizer = config.anonymizer().with_enabled(true);
    if let Some(count) = keep_last {
        anonymizer = anonymizer.with_default_rule(MaskingRule::keep_last(count));
    }

    println!("{}", serde_json::to_string_pretty(&anonymizer.anonymize(&details))?);
    Ok(())
}

fn open_store(config: &GuardConfig) -> Result<SqliteStore> {
    let store = SqliteStore::new(config.storage_path.as_deref()).context("Failed to open local log storage")?;
    tracing::debug!(path = %store.path().display(), "Opened log storage");
    Ok(store)
}

fn show_logs(config: &GuardConfig, level: Option<&str>, limit: Option<usize>, json: bool) -> Result<()> {
    let level = level
        .map(|l| LogLevel::parse(l).with_context(|| format!("Unknown log level: {}", l)))
        .transpose()?;

    let store = open_store(config)?;
    let mut entries: Vec<LogEntry> = load_rolling_entries(&store)?
        .into_iter()
        .filter(|e| level.map_or(true, |l| e.level == l))
        .collect();

    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }

    print_entries(&entries, json)
}

fn show_audits(config: &GuardConfig, calculator: Option<&str>, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let entries = load_audit_entries(&store, calculator)?;
    print_entries(&entries, json)
}

fn print_entries(entries: &[LogEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No entries found.");
        return Ok(());
    }

    println!(
        "{:<24} {:<6} {:<14} {:<12} {}",
        "TIMESTAMP".bold(),
        "LEVEL".bold(),
        "CATEGORY".bold(),
        "CALCULATOR".bold(),
        "MESSAGE".bold()
    );

    for entry in entries {
        let level = match entry.level {
            LogLevel::Error => entry.level.as_str().red(),
            LogLevel::Warn => entry.level.as_str().yellow(),
            LogLevel::Audit => entry.level.as_str().magenta(),
            LogLevel::Info => entry.level.as_str().normal(),
            LogLevel::Debug => entry.level.as_str().dimmed(),
        };

        println!(
            "{:<24} {:<6} {:<14} {:<12} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            entry.category,
            entry.calculator_context.as_deref().unwrap_or("-"),
            entry.message
        );
        if let Some(details) = &entry.anonymized_details {
            println!("    {}", details.to_string().dimmed());
        }
    }

    println!("\n{} entries", entries.len());
    Ok(())
}

async fn replay(config: GuardConfig) -> Result<()> {
    if !config.enable_remote_logging {
        anyhow::bail!("Remote logging is disabled; set enable_remote_logging and remote_endpoint");
    }

    let runtime = GuardRuntime::new(config)?;
    let restored = runtime.pipeline().restore_persisted(true)?;
    println!("Restored {} persisted entries", restored);

    match runtime.pipeline().flush().await {
        FlushOutcome::Sent(count) => println!("{} Sent {} entries", "✓".green(), count),
        FlushOutcome::Empty => println!("Nothing to send"),
        FlushOutcome::Failed(count) => {
            anyhow::bail!("Delivery failed; {} entries remain queued", count)
        }
        outcome => println!("Flush skipped: {:?}", outcome),
    }

    Ok(())
}
