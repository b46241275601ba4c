use crate::infra::build_pipeline;
use analytica::adapters::CsvExportAdapter;
use analytica::config::AppConfig;
use analytica::error::AppError;
use analytica::pipeline::{
    parse_batch_id, Decision, GateOutcome, ScoreReport, ValidationDecision,
};
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct ExtractArgs {
    /// Configured source name (for example `creb` or `crime`)
    pub(crate) source: String,
    /// Path to the CSV export
    pub(crate) csv: PathBuf,
    /// Row count the export is known to contain
    #[arg(long)]
    pub(crate) expected_rows: Option<usize>,
    /// Extraction timestamp (RFC 3339). Defaults to now.
    #[arg(long)]
    pub(crate) extracted_at: Option<DateTime<Utc>>,
    /// Stage the batch without scoring it
    #[arg(long)]
    pub(crate) no_evaluate: bool,
}

#[derive(Args, Debug)]
pub(crate) struct EvaluateArgs {
    pub(crate) batch_id: String,
    /// Auto-approval threshold for this evaluation only
    #[arg(long)]
    pub(crate) threshold: Option<f64>,
}

#[derive(Args, Debug)]
pub(crate) struct DecisionArgs {
    pub(crate) batch_id: String,
    /// Note recorded with the decision
    #[arg(long)]
    pub(crate) reason: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct RejectArgs {
    pub(crate) batch_id: String,
    /// Why the batch is rejected
    #[arg(long)]
    pub(crate) reason: String,
}

pub(crate) fn extract(config: &AppConfig, args: ExtractArgs) -> Result<(), AppError> {
    let ExtractArgs {
        source,
        csv,
        expected_rows,
        extracted_at,
        no_evaluate,
    } = args;

    let pipeline = build_pipeline(config)?;
    let adapter = CsvExportAdapter::new(source).with_expected_row_count(expected_rows);
    let batch = adapter.extract_path(&csv, extracted_at.unwrap_or_else(Utc::now))?;
    let row_count = batch.rows.len();
    let batch_id = pipeline.gate().stage(&batch)?;

    println!("Staged {batch_id} ({row_count} rows from {})", csv.display());
    if no_evaluate {
        return Ok(());
    }

    let outcome = pipeline.gate().auto_evaluate(&batch_id, None)?;
    render_outcome(&outcome);
    Ok(())
}

pub(crate) fn pending(config: &AppConfig) -> Result<(), AppError> {
    let pipeline = build_pipeline(config)?;
    let mut listed = 0usize;

    for entry in pipeline.gate().list_pending()? {
        let batch = entry?;
        listed += 1;
        let score = batch
            .last_score
            .map(|score| format!("{score:.3}"))
            .unwrap_or_else(|| "unscored".to_string());
        let expected = batch
            .expected_row_count
            .map(|expected| format!(" of {expected} expected"))
            .unwrap_or_default();
        println!(
            "{} | {} | extracted {} | {} rows{} | score {}",
            batch.batch_id,
            batch.source_name,
            batch.extracted_at.to_rfc3339(),
            batch.row_count,
            expected,
            score
        );
        for finding in &batch.findings {
            println!("  - {finding}");
        }
    }

    if listed == 0 {
        println!("No batches awaiting review.");
    }
    Ok(())
}

pub(crate) fn evaluate(config: &AppConfig, args: EvaluateArgs) -> Result<(), AppError> {
    let pipeline = build_pipeline(config)?;
    let outcome = pipeline
        .gate()
        .auto_evaluate(&parse_batch_id(args.batch_id)?, args.threshold)?;
    render_outcome(&outcome);
    Ok(())
}

pub(crate) fn approve(config: &AppConfig, args: DecisionArgs) -> Result<(), AppError> {
    let pipeline = build_pipeline(config)?;
    let decision = pipeline
        .gate()
        .decide(&parse_batch_id(args.batch_id)?, Decision::Approved, args.reason)?;
    render_decision(&decision);
    Ok(())
}

pub(crate) fn reject(config: &AppConfig, args: RejectArgs) -> Result<(), AppError> {
    let pipeline = build_pipeline(config)?;
    let decision = pipeline.gate().decide(
        &parse_batch_id(args.batch_id)?,
        Decision::Rejected,
        Some(args.reason),
    )?;
    render_decision(&decision);
    Ok(())
}

pub(crate) fn load(config: &AppConfig) -> Result<(), AppError> {
    let pipeline = build_pipeline(config)?;
    let run = pipeline.run_load()?;

    if run.batches.is_empty() {
        println!("No approved batches to load.");
        return Ok(());
    }

    println!("Loaded {} batches", run.batches.len());
    for batch_id in &run.batches {
        println!("  - {batch_id}");
    }
    println!(
        "{} candidate rows, {} superseded by later extractions, {} rejected during normalization",
        run.candidates, run.superseded, run.rows_rejected
    );
    for (table, outcome) in &run.summary.tables {
        println!(
            "{table}: {} inserted | {} updated | {} unchanged",
            outcome.inserted, outcome.updated, outcome.unchanged
        );
    }
    Ok(())
}

pub(crate) fn status(config: &AppConfig) -> Result<(), AppError> {
    let pipeline = build_pipeline(config)?;
    let areas = pipeline.gate().summary()?;
    println!(
        "Batches: {} pending | {} approved | {} rejected | {} loaded",
        areas.pending, areas.approved, areas.rejected, areas.loaded
    );

    let tables = pipeline.loader().table_counts()?;
    for (table, rows) in &tables {
        println!("{table}: {rows} rows");
    }
    Ok(())
}

pub(crate) fn history(config: &AppConfig) -> Result<(), AppError> {
    let pipeline = build_pipeline(config)?;
    let decisions = pipeline.gate().history()?;
    if decisions.is_empty() {
        println!("No decisions recorded.");
    }
    for decision in &decisions {
        render_decision(decision);
    }
    Ok(())
}

fn render_outcome(outcome: &GateOutcome) {
    match outcome {
        GateOutcome::AutoApproved { decision, report } => {
            render_report(report);
            render_decision(decision);
        }
        GateOutcome::NeedsReview {
            report,
            rows_rejected,
        } => {
            render_report(report);
            println!(
                "{} needs review ({rows_rejected} rows rejected during normalization)",
                report.batch_id
            );
        }
    }
}

fn render_report(report: &ScoreReport) {
    println!(
        "Score {:.3} for {} ({} of {} rows valid)",
        report.score, report.batch_id, report.valid_rows, report.total_rows
    );
    for component in &report.components {
        println!("  {:?}: {:.3} ({})", component.factor, component.ratio, component.notes);
    }
    for finding in &report.findings {
        println!("  - {finding}");
    }
}

fn render_decision(decision: &ValidationDecision) {
    let score = decision
        .confidence_score
        .map(|score| format!(" at score {score:.3}"))
        .unwrap_or_default();
    println!(
        "{} {} {}{}",
        decision.decided_at.to_rfc3339(),
        decision.batch_id,
        decision.summary(),
        score
    );
}
