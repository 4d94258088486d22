use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::EvalSettings;
use crate::models::{ItemResult, SummaryReport};

/// Bound on the `response_excerpt` carried by each serialized case row.
const EXCERPT_CHARS: usize = 200;

/// Persist the style run: a detailed report with every case, and a compact
/// summary for dashboards.
pub fn write_style_reports(
    dir: &Path,
    settings: &EvalSettings,
    summary: &SummaryReport,
    items: &[ItemResult],
) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory: {}", dir.display()))?;

    let detailed = json!({
        "config": {
            "rule_weight": settings.rule_weight,
            "model_weight": settings.model_weight,
            "pass_threshold": settings.pass_threshold,
            "model": &settings.model,
            "eval_model": &settings.eval_model,
        },
        "summary": summary_payload(summary),
        "cases": case_payloads(items)?,
    });
    let detailed_path = dir.join("style_eval.json");
    fs::write(&detailed_path, serde_json::to_string_pretty(&detailed)?)
        .with_context(|| format!("Failed to write report: {}", detailed_path.display()))?;

    let summary_path = dir.join("style_eval_summary.json");
    fs::write(
        &summary_path,
        serde_json::to_string_pretty(&summary_payload(summary))?,
    )
    .with_context(|| format!("Failed to write report: {}", summary_path.display()))?;

    info!(dir = %dir.display(), "style reports written");
    Ok(())
}

/// Persist the RAG run as a single report with the pass-rate verdict.
pub fn write_rag_report(
    dir: &Path,
    settings: &EvalSettings,
    summary: &SummaryReport,
    items: &[ItemResult],
) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory: {}", dir.display()))?;

    let report = json!({
        "pass_rate": summary.pass_rate,
        "target_pass_rate": settings.rag_pass_target,
        "meets_target": summary.pass_rate >= settings.rag_pass_target,
        "total": summary.total,
        "passed": summary.passed,
        "failed": summary.failed,
        "evaluation_errors": summary.evaluation_errors,
        "by_category": &summary.by_category,
        "failed_items": failed_digest(&summary.failed_items),
        "items": case_payloads(items)?,
    });
    let path = dir.join("rag_eval.json");
    fs::write(&path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

    info!(dir = %dir.display(), "RAG report written");
    Ok(())
}

/// Case rows for the detailed artifacts: the full item plus a bounded
/// `response_excerpt`, so long answers never blow up report consumers.
fn case_payloads(items: &[ItemResult]) -> Result<Vec<serde_json::Value>> {
    items
        .iter()
        .map(|item| {
            let mut row = serde_json::to_value(item)?;
            if let serde_json::Value::Object(map) = &mut row {
                map.insert(
                    "response_excerpt".to_string(),
                    json!(excerpt(&item.response.text)),
                );
            }
            Ok(row)
        })
        .collect()
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}

/// The summary without full case bodies; failed items shrink to one line each.
fn summary_payload(summary: &SummaryReport) -> serde_json::Value {
    json!({
        "total": summary.total,
        "passed": summary.passed,
        "failed": summary.failed,
        "pass_rate": summary.pass_rate,
        "evaluation_errors": summary.evaluation_errors,
        "by_category": &summary.by_category,
        "violation_counts": &summary.violation_counts,
        "failed_items": failed_digest(&summary.failed_items),
    })
}

fn failed_digest(failed: &[ItemResult]) -> Vec<serde_json::Value> {
    failed
        .iter()
        .map(|item| {
            json!({
                "prompt": &item.prompt.text,
                "category": &item.prompt.category,
                "reason": &item.reason,
                "combined_score": item.combined_score,
            })
        })
        .collect()
}

/// Console digest for a style run, printed before any file is touched so
/// results survive a persistence failure.
pub fn print_style_digest(summary: &SummaryReport, settings: &EvalSettings) {
    println!("\n=== Style Evaluation ===");
    println!("{:<24} {}", "Prompts evaluated:", summary.total);
    println!(
        "{:<24} {} / {} ({:.1}%)",
        "Passed:",
        summary.passed,
        summary.total,
        summary.pass_rate * 100.0
    );
    println!("{:<24} {:.2}", "Pass threshold:", settings.pass_threshold);
    if summary.evaluation_errors > 0 {
        println!(
            "{:<24} {} (generation or grading errors, not quality failures)",
            "Failed to evaluate:", summary.evaluation_errors
        );
    }

    print_category_table(summary);

    if !summary.violation_counts.is_empty() {
        println!("\nRule violations:");
        for (violation, count) in &summary.violation_counts {
            println!("  {violation:<24} {count}");
        }
    }

    print_failures(summary);
}

/// Console digest for a RAG run.
pub fn print_rag_digest(summary: &SummaryReport, settings: &EvalSettings) {
    let meets_target = summary.pass_rate >= settings.rag_pass_target;
    println!("\n=== RAG Evaluation ===");
    println!("{:<24} {}", "Prompts evaluated:", summary.total);
    println!(
        "{:<24} {} / {} ({:.1}%)",
        "Passed:",
        summary.passed,
        summary.total,
        summary.pass_rate * 100.0
    );
    println!(
        "{:<24} {:.1}% -> {}",
        "Target pass rate:",
        settings.rag_pass_target * 100.0,
        if meets_target { "met" } else { "NOT met" }
    );
    if summary.evaluation_errors > 0 {
        println!(
            "{:<24} {} (generation errors, not quality failures)",
            "Failed to evaluate:", summary.evaluation_errors
        );
    }

    print_category_table(summary);
    print_failures(summary);
}

fn print_category_table(summary: &SummaryReport) {
    if summary.by_category.is_empty() {
        return;
    }
    println!("\n{:<20} {:>8} {:>8}", "Category", "Passed", "Failed");
    for (category, count) in &summary.by_category {
        println!("{:<20} {:>8} {:>8}", category, count.passed, count.failed);
    }
}

fn print_failures(summary: &SummaryReport) {
    if summary.failed_items.is_empty() {
        return;
    }
    println!("\nFailures:");
    for item in &summary.failed_items {
        match item.combined_score {
            Some(score) => println!(
                "  [{}] {} (score {:.2})",
                item.reason, item.prompt.text, score
            ),
            None => println!("  [{}] {}", item.reason, item.prompt.text),
        }
    }
}
