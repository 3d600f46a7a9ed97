//! Dossier rendering for pipeline results.
//!
//! JSON is always available. Other formats need a [`DossierRenderer`]
//! registered on the pipeline; [`MarkdownDossierRenderer`] ships ready-made.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::domain::{Decision, PipelineResult};

/// Output format of a dossier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Markdown,
    Html,
    Pdf,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
            ReportFormat::Html => "html",
            ReportFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "markdown",
            ReportFormat::Html => "html",
            ReportFormat::Pdf => "pdf",
        })
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "md" | "markdown" => Ok(ReportFormat::Markdown),
            "html" => Ok(ReportFormat::Html),
            "pdf" => Ok(ReportFormat::Pdf),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

/// Renders a complete pipeline result into dossier bytes.
pub trait DossierRenderer: Send + Sync {
    fn format(&self) -> ReportFormat;

    fn render(&self, result: &PipelineResult) -> Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDossierRenderer;

impl DossierRenderer for JsonDossierRenderer {
    fn format(&self) -> ReportFormat {
        ReportFormat::Json
    }

    fn render(&self, result: &PipelineResult) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(result).context("serialize pipeline result")
    }
}

/// Human-readable summary: decision, per-module outcomes, findings.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownDossierRenderer;

impl DossierRenderer for MarkdownDossierRenderer {
    fn format(&self) -> ReportFormat {
        ReportFormat::Markdown
    }

    fn render(&self, result: &PipelineResult) -> Result<Vec<u8>> {
        Ok(render_markdown(result).into_bytes())
    }
}

pub fn render_markdown(result: &PipelineResult) -> String {
    let candidate = &result.candidate;
    let mut out = String::new();
    out.push_str(&format!("# Dossier: {}\n\n", candidate.name));
    out.push_str(&format!(
        "- modality: {}\n- target: {}\n- candidate hash: `{}`\n- overall decision: **{}**\n- runtime: {:.2}s\n- config hash: `{}`\n",
        candidate.modality,
        candidate.target,
        candidate.hash(),
        result.overall_decision,
        result.total_runtime_seconds,
        result.config_hash,
    ));
    if let Some(module) = &result.gated_by {
        out.push_str(&format!("- stopped early by critical module `{module}`\n"));
    }
    out.push('\n');

    out.push_str("## Modules\n\n| module | version | decision | runtime (s) |\n|---|---|---|---|\n");
    for name in &result.execution_order {
        if let Some(r) = result.module_results.get(name) {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                name,
                r.module_version,
                r.decision,
                r.runtime_seconds
                    .map(|s| format!("{s:.2}"))
                    .unwrap_or_else(|| "-".to_string()),
            ));
        }
    }
    out.push('\n');

    for name in &result.execution_order {
        let Some(r) = result.module_results.get(name) else {
            continue;
        };
        if r.decision == Decision::Pass && r.risks.is_empty() && r.recommendations.is_empty() {
            continue;
        }
        out.push_str(&format!("### {name}\n\n{}\n\n", r.summary));
        for metric in &r.metrics {
            out.push_str(&format!(
                "- `{}` = {}{} ({})\n",
                metric.name,
                metric.value,
                metric.unit.as_deref().map(|u| format!(" {u}")).unwrap_or_default(),
                metric.tier(),
            ));
        }
        for risk in &r.risks {
            out.push_str(&format!("- risk: {risk}\n"));
        }
        for rec in &r.recommendations {
            out.push_str(&format!("- recommendation: {rec}\n"));
        }
        out.push('\n');
    }
    out
}

/// `<reports_dir>/<candidate>_dossier_<YYYYmmdd_HHMMSS>.<ext>`.
pub fn default_dossier_path(
    reports_dir: &Path,
    result: &PipelineResult,
    format: ReportFormat,
) -> PathBuf {
    let safe_name: String = result
        .candidate
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stamp = result.timestamp.format("%Y%m%d_%H%M%S");
    reports_dir.join(format!(
        "{safe_name}_dossier_{stamp}.{}",
        format.extension()
    ))
}

/// Render with `renderer` and write atomically to `path`.
pub fn write_dossier(
    renderer: &dyn DossierRenderer,
    result: &PipelineResult,
    path: &Path,
) -> Result<PathBuf> {
    let bytes = renderer.render(result)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).context("create temp dossier")?;
    tmp.write_all(&bytes).context("write dossier")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("write {:?}", path))?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candidate, MetricResult, Modality, ValidationResult};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn result() -> PipelineResult {
        let candidate = Candidate::new("AB/001 v2", Modality::Antibody, "PD-L1");
        let mut module_results = BTreeMap::new();
        module_results.insert(
            "developability".to_string(),
            ValidationResult::new("developability", "0.3.0", &candidate, Decision::Revise, "2 liabilities")
                .with_metric(MetricResult::new("deamidation_sites", 2i64).with_decision(Decision::Revise))
                .with_recommendation("mutate N55"),
        );
        PipelineResult {
            candidate,
            overall_decision: Decision::Revise,
            module_results,
            execution_order: vec!["developability".to_string()],
            gated_by: None,
            total_runtime_seconds: 1.5,
            timestamp: Utc::now(),
            config_hash: "0123456789abcdef".to_string(),
            audit_trail_id: None,
        }
    }

    #[test]
    fn json_dossier_round_trips() {
        let r = result();
        let bytes = JsonDossierRenderer.render(&r).expect("render");
        let back: PipelineResult = serde_json::from_slice(&bytes).expect("parse");
        assert_eq!(back, r);
    }

    #[test]
    fn markdown_lists_modules_and_findings() {
        let md = render_markdown(&result());
        assert!(md.contains("# Dossier: AB/001 v2"));
        assert!(md.contains("| developability | 0.3.0 | REVISE |"));
        assert!(md.contains("recommendation: mutate N55"));
    }

    #[test]
    fn default_path_sanitizes_candidate_name() {
        let r = result();
        let path = default_dossier_path(Path::new("out/reports"), &r, ReportFormat::Markdown);
        let file = path.file_name().and_then(|f| f.to_str()).expect("file name");
        assert!(file.starts_with("AB_001_v2_dossier_"));
        assert!(file.ends_with(".md"));
    }

    #[test]
    fn write_dossier_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reports/nested/dossier.json");
        write_dossier(&JsonDossierRenderer, &result(), &path).expect("write");
        assert!(path.exists());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("MD".parse::<ReportFormat>(), Ok(ReportFormat::Markdown));
        assert!("docx".parse::<ReportFormat>().is_err());
    }
}
