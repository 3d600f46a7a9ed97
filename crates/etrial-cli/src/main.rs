//! eTrial CLI
//!
//! The `etrial` command inspects the artifacts the screening core produces.
//!
//! ## Commands
//!
//! - `config`: hash a pipeline configuration, list enabled modules
//! - `thresholds`: resolve a metric value or a set of module decisions
//! - `audit`: print a saved trail's timeline, compare two trails
//! - `dossier`: render a saved pipeline result
//! - `batch`: summarize a saved funnel batch result

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};

use etrial_core::report::{default_dossier_path, write_dossier};
use etrial_core::{
    AuditRecord, Decision, DossierRenderer, EtrialConfig, EventKind, JsonDossierRenderer,
    MarkdownDossierRenderer, MetricValue, PipelineResult, ReportFormat, ThresholdManager,
};
use etrial_funnel::BatchResult;

#[derive(Parser)]
#[command(name = "etrial")]
#[command(author = "eTrial Developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Therapeutic-candidate screening toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pipeline configuration operations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Threshold resolution
    Thresholds {
        #[command(subcommand)]
        action: ThresholdsAction,
    },

    /// Audit trail inspection
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Render a saved pipeline result as a dossier
    Dossier {
        /// Pipeline result JSON file
        result: PathBuf,

        /// Output format (json, markdown)
        #[arg(short, long, default_value = "markdown")]
        format: ReportFormat,

        /// Output path (default: <reports_dir>/<candidate>_dossier_<stamp>.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reports directory used when --output is omitted
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
    },

    /// Funnel batch result operations
    Batch {
        #[command(subcommand)]
        action: BatchAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration hash and enabled modules
    Hash {
        /// Pipeline configuration YAML
        #[arg(short, long, env = "ETRIAL_CONFIG")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ThresholdsAction {
    /// Resolve one metric value to a decision tier (exit code = tier)
    Apply {
        /// Thresholds YAML
        #[arg(short, long, env = "ETRIAL_THRESHOLDS")]
        thresholds: PathBuf,

        #[arg(long)]
        module: String,

        #[arg(long)]
        metric: String,

        /// Value as reported by the module (number, bool or text)
        #[arg(long)]
        value: String,
    },

    /// Combine module decisions into an overall decision (exit code = tier)
    Overall {
        /// Thresholds YAML
        #[arg(short, long, env = "ETRIAL_THRESHOLDS")]
        thresholds: PathBuf,

        /// Module decisions (PASS, REVISE, KILL, INFORMATIVE)
        #[arg(required = true)]
        decisions: Vec<Decision>,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Print a saved trail's entries in timestamp order
    Timeline {
        /// Audit trail JSON file
        trail: PathBuf,

        /// Only entries for this module
        #[arg(long)]
        module: Option<String>,

        /// Only entries of this event kind (e.g. module_completed)
        #[arg(long)]
        kind: Option<String>,
    },

    /// Compare two trails for reproducibility (exit 1 on mismatch)
    Verify {
        /// Reference trail
        reference: PathBuf,

        /// Trail to compare against the reference
        other: PathBuf,
    },
}

#[derive(Subcommand)]
enum BatchAction {
    /// Print per-stage statistics of a saved batch result
    Summary {
        /// Batch result JSON file
        batch: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    etrial_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Hash { config } => cmd_config_hash(&config),
        },
        Commands::Thresholds { action } => match action {
            ThresholdsAction::Apply {
                thresholds,
                module,
                metric,
                value,
            } => cmd_thresholds_apply(&thresholds, &module, &metric, &value),
            ThresholdsAction::Overall {
                thresholds,
                decisions,
            } => cmd_thresholds_overall(&thresholds, &decisions),
        },
        Commands::Audit { action } => match action {
            AuditAction::Timeline {
                trail,
                module,
                kind,
            } => cmd_audit_timeline(&trail, module.as_deref(), kind.as_deref()),
            AuditAction::Verify { reference, other } => cmd_audit_verify(&reference, &other),
        },
        Commands::Dossier {
            result,
            format,
            output,
            reports_dir,
        } => cmd_dossier(&result, format, output.as_deref(), &reports_dir),
        Commands::Batch { action } => match action {
            BatchAction::Summary { batch } => cmd_batch_summary(&batch),
        },
    }
}

fn decision_exit(decision: Decision) -> ExitCode {
    ExitCode::from(decision.exit_code().clamp(0, u8::MAX as i32) as u8)
}

/// Numbers, booleans and `n/a` get their typed form; anything else is text.
fn parse_metric_value(raw: &str) -> MetricValue {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("n/a") {
        return MetricValue::Missing;
    }
    if let Ok(b) = raw.parse::<bool>() {
        return MetricValue::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return MetricValue::Int(i);
    }
    match raw.parse::<f64>() {
        Ok(f) => MetricValue::Float(f),
        Err(_) => MetricValue::Text(raw.to_string()),
    }
}

#[derive(Serialize)]
struct ConfigSummary<'a> {
    config_hash: String,
    enabled_modules: Vec<&'a str>,
    max_concurrency: usize,
}

fn cmd_config_hash(path: &Path) -> Result<ExitCode> {
    let config = EtrialConfig::from_yaml_path(path)
        .with_context(|| format!("Failed to load config {:?}", path))?;
    let summary = ConfigSummary {
        config_hash: config.config_hash(),
        enabled_modules: config.enabled_modules(),
        max_concurrency: config.max_concurrency(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_thresholds_apply(path: &Path, module: &str, metric: &str, raw: &str) -> Result<ExitCode> {
    let thresholds = ThresholdManager::load(path)
        .with_context(|| format!("Failed to load thresholds {:?}", path))?;
    let value = parse_metric_value(raw);
    if thresholds.metric_thresholds(module, metric).is_none() {
        info!(module, metric, "no thresholds configured; metric is informative");
    }
    let decision = thresholds.apply_threshold(module, metric, &value);
    println!("{module}.{metric} = {value} -> {decision}");
    Ok(decision_exit(decision))
}

fn cmd_thresholds_overall(path: &Path, decisions: &[Decision]) -> Result<ExitCode> {
    let thresholds = ThresholdManager::load(path)
        .with_context(|| format!("Failed to load thresholds {:?}", path))?;
    let overall = thresholds.overall_decision(decisions.iter().copied());
    println!("{overall}");
    Ok(decision_exit(overall))
}

fn cmd_audit_timeline(path: &Path, module: Option<&str>, kind: Option<&str>) -> Result<ExitCode> {
    let record = AuditRecord::load(path)
        .with_context(|| format!("Failed to load audit trail {:?}", path))?;
    let kind = kind.map(EventKind::from);

    println!("trail {}", record.trail_id);
    if let Some(hash) = &record.config_hash {
        println!("config {}", hash);
    }
    for (name, version) in &record.model_versions {
        println!("model {} {}", name, version);
    }
    println!();

    let mut shown = 0usize;
    for entry in record.timeline() {
        if module.is_some_and(|m| entry.module.as_deref() != Some(m)) {
            continue;
        }
        if kind.as_ref().is_some_and(|k| &entry.kind != k) {
            continue;
        }
        println!(
            "{}  {:<22} {:<24} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.kind,
            entry.module.as_deref().unwrap_or("-"),
            entry
                .candidate_hash
                .as_ref()
                .map(|h| &h.as_str()[..h.as_str().len().min(12)])
                .unwrap_or("-"),
        );
        shown += 1;
    }
    info!(entries = shown, total = record.entries.len(), "timeline printed");
    Ok(ExitCode::SUCCESS)
}

fn cmd_audit_verify(reference: &Path, other: &Path) -> Result<ExitCode> {
    let a = AuditRecord::load(reference)
        .with_context(|| format!("Failed to load audit trail {:?}", reference))?;
    let b = AuditRecord::load(other)
        .with_context(|| format!("Failed to load audit trail {:?}", other))?;
    let report = a.verify_reproducibility(&b);

    println!("config:         {}", verdict(report.config_match));
    println!("model versions: {}", verdict(report.model_versions_match));
    println!("environment:    {}", verdict(report.environment_match));
    for diff in &report.differences {
        println!("  - {}", diff);
    }

    if report.is_reproducible() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn verdict(ok: bool) -> &'static str {
    if ok {
        "match"
    } else {
        "MISMATCH"
    }
}

fn renderer_for(format: ReportFormat) -> Result<Box<dyn DossierRenderer>> {
    match format {
        ReportFormat::Json => Ok(Box::new(JsonDossierRenderer)),
        ReportFormat::Markdown => Ok(Box::new(MarkdownDossierRenderer)),
        other => anyhow::bail!("no renderer available for {} dossiers", other),
    }
}

fn cmd_dossier(
    path: &Path,
    format: ReportFormat,
    output: Option<&Path>,
    reports_dir: &Path,
) -> Result<ExitCode> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let result: PipelineResult =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;

    let renderer = renderer_for(format)?;
    let target = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_dossier_path(reports_dir, &result, format));
    let written = write_dossier(renderer.as_ref(), &result, &target)?;

    println!("{}", written.display());
    Ok(decision_exit(result.overall_decision))
}

fn cmd_batch_summary(path: &Path) -> Result<ExitCode> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let batch: BatchResult =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
    let stats = batch.statistics();

    println!("mode: {}", stats.mode);
    for stage in &stats.stages {
        println!(
            "{:<10} in={:<6} out={:<6} pass_rate={:.3} runtime={:.2}s throughput={:.1}/s failures={}",
            stage.stage,
            stage.candidates_in,
            stage.candidates_out,
            stage.pass_rate,
            stage.runtime_seconds,
            stage.throughput_per_second,
            stage.failures,
        );
    }
    println!(
        "final: PASS={} REVISE={} KILL={} (pass rate {:.3}, {:.2}s total)",
        stats.final_decisions.pass,
        stats.final_decisions.revise,
        stats.final_decisions.kill,
        batch.final_pass_rate,
        stats.total_runtime_seconds,
    );
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn metric_values_parse_to_typed_form() {
        assert_eq!(parse_metric_value("3"), MetricValue::Int(3));
        assert_eq!(parse_metric_value("0.75"), MetricValue::Float(0.75));
        assert_eq!(parse_metric_value("true"), MetricValue::Bool(true));
        assert_eq!(parse_metric_value("n/a"), MetricValue::Missing);
        assert_eq!(
            parse_metric_value("high"),
            MetricValue::Text("high".to_string())
        );
    }

    #[test]
    fn overall_parses_decisions() {
        let cli = Cli::try_parse_from([
            "etrial",
            "thresholds",
            "overall",
            "--thresholds",
            "t.yaml",
            "PASS",
            "kill",
        ])
        .expect("parse");
        match cli.command {
            Commands::Thresholds {
                action: ThresholdsAction::Overall { decisions, .. },
            } => assert_eq!(decisions, vec![Decision::Pass, Decision::Kill]),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn thresholds_apply_exit_code_follows_tier() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("thresholds.yaml");
        std::fs::write(
            &path,
            "toxicity:\n  herg_ic50:\n    PASS: [10.0, null]\n    REVISE: [1.0, 10.0]\n    KILL: [null, 1.0]\n",
        )
        .expect("write");

        let pass = cmd_thresholds_apply(&path, "toxicity", "herg_ic50", "30").expect("apply");
        assert_eq!(pass, decision_exit(Decision::Pass));
        let kill = cmd_thresholds_apply(&path, "toxicity", "herg_ic50", "0.5").expect("apply");
        assert_eq!(kill, decision_exit(Decision::Kill));
    }

    #[test]
    fn pdf_dossier_has_no_renderer() {
        assert!(renderer_for(ReportFormat::Pdf).is_err());
        assert!(renderer_for(ReportFormat::Markdown).is_ok());
    }
}
