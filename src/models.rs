use serde::{Deserialize, Serialize};

/// A single test prompt loaded from a prompt set.
///
/// Identity is positional: the batch runner reports results in the same
/// order the prompts were loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalPrompt {
    /// The question posed to the bot
    pub text: String,
    /// Category used for the per-category breakdown
    pub category: String,
    /// True when the knowledge base holds no answer and the bot must abstain
    pub out_of_scope: bool,
}

impl EvalPrompt {
    pub fn in_scope(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
            out_of_scope: false,
        }
    }
}

/// A structured pointer claiming the response is grounded in a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub page: Option<u32>,
    pub snippet: String,
}

impl Citation {
    /// A citation only counts when all three fields are populated.
    pub fn is_complete(&self) -> bool {
        !self.source.trim().is_empty() && self.page.is_some() && !self.snippet.trim().is_empty()
    }
}

/// What the bot produced for one prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotResponse {
    /// The generated answer text
    pub text: String,
    /// Structured citations, in the order the bot emitted them
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Style rule violations detected by the rule checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleViolation {
    EmojiPresent,
    ExcessiveExclamation,
    ResponseTooLong,
}

impl RuleViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleViolation::EmojiPresent => "emoji_present",
            RuleViolation::ExcessiveExclamation => "excessive_exclamation",
            RuleViolation::ResponseTooLong => "response_too_long",
        }
    }
}

/// The judge model's scored verdict on a single response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVerdict {
    /// Adherence score in [0, 1]
    pub score: f64,
    /// The judge's justification for the score
    pub rationale: String,
}

/// Final, immutable result for one evaluated prompt.
///
/// Style mode fills `rule_score`/`model_score`; RAG mode fills
/// `citations_checked`. Optional fields stay out of the serialized report
/// for the mode that does not produce them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub prompt: EvalPrompt,
    pub response: BotResponse,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rule_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rule_violations: Option<Vec<RuleViolation>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub citations_checked: Option<usize>,
    pub combined_score: Option<f64>,
    pub passed: bool,
    pub reason: String,
}

impl ItemResult {
    /// True when the item never got a verdict (generation or grading
    /// infrastructure failed), as opposed to failing the quality check.
    pub fn failed_to_evaluate(&self) -> bool {
        matches!(self.reason.as_str(), "generation_failed" | "grading_failed")
    }
}

/// Pass/fail counters for one prompt category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryCount {
    pub passed: usize,
    pub failed: usize,
}

/// Batch-level rollup, recomputed fresh from the item sequence on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Exactly passed / total (0 for an empty batch)
    pub pass_rate: f64,
    /// Items that could not be evaluated at all (generation/grading errors)
    pub evaluation_errors: usize,
    /// Category -> counters, in first-seen order
    pub by_category: Vec<(String, CategoryCount)>,
    /// How often each rule violation fired across the batch
    pub violation_counts: Vec<(String, usize)>,
    /// Failing items in original batch order
    pub failed_items: Vec<ItemResult>,
}
