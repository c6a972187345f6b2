use crate::cli::AnalyzeArgs;
use crate::commands::resolve_project;
use analysis_state::{AnalysisStatus, LiveIssue};
use anyhow::Result;
use orchestrator::AnalysisOrchestrator;
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileReport {
    file: String,
    status: AnalysisStatus,
    issues: Vec<LiveIssue>,
}

pub async fn run(orchestrator: &AnalysisOrchestrator, args: AnalyzeArgs) -> Result<()> {
    let fallback_base_dir = match &args.base_dir {
        Some(base_dir) => base_dir.clone(),
        None => std::env::current_dir()?,
    };
    let options = resolve_project(args.project.as_deref(), &fallback_base_dir, &args.connection)?;

    let Some(outcome) = orchestrator
        .run_batch(args.files, &options.base_dir, options.connection)
        .await?
    else {
        anyhow::bail!("No files to analyze under {}", options.base_dir.display());
    };
    info!(
        batch_id = %outcome.batch_id,
        issue_count = outcome.issue_count,
        "Analysis finished"
    );

    let mut reports = Vec::with_capacity(outcome.files.len());
    for file in &outcome.files {
        reports.push(FileReport {
            file: file.display().to_string(),
            status: orchestrator.get_analysis_status(file).await?,
            issues: orchestrator.get_issues(file, None).await?,
        });
    }

    if args.connection.json {
        // Results go to stdout; logs go to stderr.
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        println!("{} ({})", report.file, report.status);
        for issue in &report.issues {
            println!(
                "  {}:{} {} {}",
                issue.start_line(),
                issue.range.start_line_offset,
                issue.rule_key,
                issue.message
            );
        }
    }
    println!(
        "Analyzed {} file(s), found {} issue(s)",
        reports.len(),
        outcome.issue_count
    );
    Ok(())
}
