use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use colored::Colorize;
use serde_json::json;
use tracing::debug;
use twinblob_journal::{
    FileJournal, FileJournalConfig, JournalSettings, Obligation, ObligationJournal,
};
use twinblob_replication::{JournalKind, ReplicationMode, TwinBlobConfig};
use twinblob_types::Timestamp;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::CheckConfig(args) => cmd_check_config(args, &cli.format),
        Command::Journal(JournalArgs { action }) => match action {
            JournalAction::Inspect { path, limit } => cmd_journal_inspect(&path, limit, &cli.format),
            JournalAction::Compact { path } => cmd_journal_compact(&path, &cli.format),
        },
    }
}

fn cmd_check_config(args: CheckConfigArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let config = TwinBlobConfig::from_toml_file(&args.file)
        .with_context(|| format!("invalid configuration {}", args.file.display()))?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let bs = &config.blob_store;
    println!("{} {} is valid", "✓".green().bold(), args.file.display().to_string().bold());
    println!("  Primary: {}", bs.primary.cyan());
    match (bs.replication, bs.secondary.as_deref()) {
        (ReplicationMode::Enabled, Some(secondary)) => {
            println!("  Secondary: {}", secondary.cyan());
            println!("  Replication: {}", "enabled".green());
        }
        _ => {
            println!("  Replication: {} (primary used directly)", "disabled".yellow());
            return Ok(());
        }
    }
    match bs.journal.kind {
        JournalKind::Memory => println!(
            "  Journal: {} (obligations are lost on restart)",
            "memory".yellow()
        ),
        JournalKind::File => {
            let path = bs
                .journal
                .path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("  Journal: {} at {} (sync: {:?})", "file".green(), path.bold(), bs.journal.sync);
            println!("    Compaction threshold: {} records", bs.journal.compaction_threshold);
        }
    }
    println!(
        "  Backoff: {}ms base, {}ms ceiling, jitter {}",
        bs.backoff.base_delay_ms, bs.backoff.max_delay_ms, bs.backoff.jitter_factor
    );
    println!(
        "  Reconciler: {} workers, attempt timeout {}ms, lease {}ms, poll {}ms",
        bs.reconciler.max_workers,
        bs.reconciler.attempt_timeout_ms,
        bs.reconciler.lease_timeout_ms,
        bs.reconciler.poll_interval_ms
    );
    Ok(())
}

/// Open an existing journal without triggering compaction.
fn open_existing(path: &Path) -> anyhow::Result<FileJournal> {
    if !path.is_file() {
        bail!("no journal at {}", path.display());
    }
    let config = FileJournalConfig {
        compaction_threshold: usize::MAX,
        ..FileJournalConfig::default()
    };
    FileJournal::open(path, JournalSettings::default(), config)
        .with_context(|| format!("failed to open journal {}", path.display()))
}

fn format_time(ts: Timestamp) -> String {
    i64::try_from(ts.as_millis())
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ts.to_string())
}

fn obligation_json(ob: &Obligation) -> serde_json::Value {
    json!({
        "seq": ob.seq,
        "kind": ob.kind.label(),
        "target": ob.key().to_string(),
        "created_at": format_time(ob.created_at),
        "attempts": ob.attempt_count,
        "next_attempt_at": format_time(ob.next_attempt_at),
        "last_error": ob.last_error,
    })
}

fn cmd_journal_inspect(path: &Path, limit: Option<usize>, format: &OutputFormat) -> anyhow::Result<()> {
    let journal = open_existing(path)?;
    let records = journal.record_count()?;
    let pending = journal.pending()?;
    let shown = limit.unwrap_or(pending.len()).min(pending.len());
    debug!(records, pending = pending.len(), shown, "journal loaded");

    if let OutputFormat::Json = format {
        let obligations: Vec<_> = pending.iter().take(shown).map(obligation_json).collect();
        let out = json!({
            "path": path.display().to_string(),
            "records": records,
            "pending": pending.len(),
            "obligations": obligations,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "Journal {}: {} records, {} pending",
        path.display().to_string().bold(),
        records,
        pending.len().to_string().bold()
    );
    if pending.is_empty() {
        println!("{} Nothing to replicate.", "✓".green().bold());
        return Ok(());
    }
    let now = Timestamp::now();
    for ob in pending.iter().take(shown) {
        let state = if ob.attempt_count == 0 {
            "new".green()
        } else if ob.is_ready(now) {
            format!("retry #{}", ob.attempt_count).yellow()
        } else {
            format!("retry #{} at {}", ob.attempt_count, format_time(ob.next_attempt_at)).yellow()
        };
        println!(
            "  {} {:<18} {} {}",
            format!("#{}", ob.seq).dimmed(),
            ob.kind.label().cyan(),
            ob.key(),
            state
        );
        if let Some(error) = &ob.last_error {
            println!("      last error: {}", error.red());
        }
    }
    if shown < pending.len() {
        println!("  ... {} more", pending.len() - shown);
    }
    Ok(())
}

fn cmd_journal_compact(path: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    let journal = open_existing(path)?;
    let before = journal.record_count()?;
    journal.compact().context("compaction failed")?;
    let after = journal.record_count()?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "before": before, "after": after }))?
        ),
        OutputFormat::Text => println!(
            "{} Compacted {}: {} records -> {}",
            "✓".green().bold(),
            path.display().to_string().bold(),
            before,
            after
        ),
    }
    Ok(())
}
