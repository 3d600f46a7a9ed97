use std::sync::Arc;

use etrial_core::fakes::StaticModule;
use etrial_core::{
    AuditTrail, Candidate, Decision, EtrialConfig, MarkdownDossierRenderer, Modality,
    PipelineError, PipelineResult, RegisterOptions, ReportFormat, ValidateOptions,
    ValidationPipeline,
};

async fn validated(output_dir: &std::path::Path) -> (ValidationPipeline, PipelineResult) {
    let config = EtrialConfig::from_yaml_str(&format!(
        "global:\n  output_dir: {}\n",
        output_dir.display()
    ))
    .expect("config");
    let mut p = ValidationPipeline::builder(config)
        .audit(Arc::new(AuditTrail::in_memory()))
        .build()
        .await
        .expect("build");
    p.register_module(StaticModule::shared("developability", Decision::Revise), RegisterOptions::default())
        .await;
    let candidate = Candidate::new("NB-7", Modality::Nanobody, "HER2").with_sequence("QVQLQESGG");
    let result = p
        .validate(&candidate, ValidateOptions::default())
        .await
        .expect("validate");
    (p, result)
}

#[tokio::test]
async fn json_dossier_lands_in_reports_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (p, result) = validated(dir.path()).await;

    let path = p
        .generate_dossier(&result, None, ReportFormat::Json)
        .expect("dossier");
    assert!(path.starts_with(dir.path().join("reports")));
    let name = path.file_name().and_then(|f| f.to_str()).expect("name");
    assert!(name.starts_with("NB-7_dossier_"));

    let back: PipelineResult =
        serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("parse");
    assert_eq!(back.overall_decision, Decision::Revise);
}

#[tokio::test]
async fn other_formats_need_a_renderer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut p, result) = validated(dir.path()).await;

    let err = p
        .generate_dossier(&result, None, ReportFormat::Html)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Report(_)));

    p.register_renderer(Arc::new(MarkdownDossierRenderer));
    let target = dir.path().join("custom.md");
    let path = p
        .generate_dossier(&result, Some(&target), ReportFormat::Markdown)
        .expect("markdown");
    assert_eq!(path, target);
    let text = std::fs::read_to_string(&path).expect("read");
    assert!(text.contains("**REVISE**"));
}
