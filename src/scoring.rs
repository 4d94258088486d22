use crate::config::EvalSettings;
use crate::models::{CategoryCount, ItemResult, SummaryReport};

/// Blend the deterministic rule score with the judge score.
///
/// Returns `None` when the model score is missing: an item the judge never
/// graded is failed outright rather than scored on rules alone, which would
/// misrepresent the hybrid contract.
pub fn blend(settings: &EvalSettings, rule_score: f64, model_score: Option<f64>) -> Option<f64> {
    let model_score = model_score?;
    let combined = settings.rule_weight * rule_score + settings.model_weight * model_score;
    Some(combined.clamp(0.0, 1.0))
}

/// Fold the ordered item sequence into the batch summary.
///
/// Pure: nothing here mutates shared state during the batch; the summary is
/// recomputed fresh from the finished items on every run.
pub fn summarize(items: &[ItemResult]) -> SummaryReport {
    let total = items.len();
    let passed = items.iter().filter(|item| item.passed).count();
    let failed = total - passed;
    let pass_rate = if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64
    };
    let evaluation_errors = items.iter().filter(|item| item.failed_to_evaluate()).count();

    let mut by_category: Vec<(String, CategoryCount)> = Vec::new();
    let mut violation_counts: Vec<(String, usize)> = Vec::new();
    let mut failed_items = Vec::new();

    for item in items {
        let category = item.prompt.category.as_str();
        let slot = match by_category.iter().position(|(name, _)| name == category) {
            Some(index) => index,
            None => {
                by_category.push((category.to_string(), CategoryCount::default()));
                by_category.len() - 1
            }
        };
        let counter = &mut by_category[slot].1;
        if item.passed {
            counter.passed += 1;
        } else {
            counter.failed += 1;
            failed_items.push(item.clone());
        }

        if let Some(violations) = &item.rule_violations {
            for violation in violations {
                let name = violation.as_str();
                match violation_counts.iter_mut().find(|(v, _)| v == name) {
                    Some((_, count)) => *count += 1,
                    None => violation_counts.push((name.to_string(), 1)),
                }
            }
        }
    }
    violation_counts.sort_by(|a, b| b.1.cmp(&a.1));

    SummaryReport {
        total,
        passed,
        failed,
        pass_rate,
        evaluation_errors,
        by_category,
        violation_counts,
        failed_items,
    }
}
