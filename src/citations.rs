use crate::models::{BotResponse, EvalPrompt};

/// Verdict of the RAG citation check for one item.
#[derive(Debug, Clone)]
pub struct CitationVerdict {
    pub passed: bool,
    pub reason: &'static str,
    /// How many structured citations the response carried
    pub citations_checked: usize,
}

/// Phrases that signal the bot admitted it has no answer, regardless of
/// the persona's exact fallback wording.
const FALLBACK_INDICATORS: &[&str] = &[
    "не знаю",
    "не ведаю",
    "не приходилось слыхать",
    "нет информации",
    "не могу ответить",
    "нет данных",
    "информация отсутствует",
    "не в курсе",
];

/// Deterministic correctness check for RAG responses.
///
/// In-scope prompts must carry at least one complete citation; out-of-scope
/// prompts must abstain with the fallback phrasing and no citations. The
/// citation side of the judgment reads only the structured citation list,
/// never the response text.
#[derive(Debug, Clone)]
pub struct CitationValidator {
    fallback_phrase: String,
}

impl CitationValidator {
    pub fn new(fallback_phrase: impl Into<String>) -> Self {
        Self {
            fallback_phrase: fallback_phrase.into().to_lowercase(),
        }
    }

    pub fn validate(&self, prompt: &EvalPrompt, response: &BotResponse) -> CitationVerdict {
        if prompt.out_of_scope {
            self.validate_out_of_scope(response)
        } else {
            self.validate_in_scope(response)
        }
    }

    fn validate_in_scope(&self, response: &BotResponse) -> CitationVerdict {
        let checked = response.citations.len();
        if response.citations.is_empty() {
            return CitationVerdict {
                passed: false,
                reason: "no_citations",
                citations_checked: checked,
            };
        }
        if response.citations.iter().any(|c| c.is_complete()) {
            CitationVerdict {
                passed: true,
                reason: "valid_citations",
                citations_checked: checked,
            }
        } else {
            CitationVerdict {
                passed: false,
                reason: "invalid_citations",
                citations_checked: checked,
            }
        }
    }

    fn validate_out_of_scope(&self, response: &BotResponse) -> CitationVerdict {
        let checked = response.citations.len();
        // Any structured citation for a question the corpus cannot answer is
        // fabricated, even when the text also abstains.
        if !response.citations.is_empty() {
            return CitationVerdict {
                passed: false,
                reason: "fake_citations",
                citations_checked: checked,
            };
        }
        if self.uses_fallback(&response.text) {
            CitationVerdict {
                passed: true,
                reason: "correct_fallback",
                citations_checked: checked,
            }
        } else {
            CitationVerdict {
                passed: false,
                reason: "hallucinated_answer",
                citations_checked: checked,
            }
        }
    }

    /// Whether the answer text reads as an abstention: the exact persona
    /// fallback, at least half of its significant words, or a known
    /// "don't know" phrase.
    fn uses_fallback(&self, answer: &str) -> bool {
        let answer = answer.to_lowercase();

        if !self.fallback_phrase.is_empty() && answer.contains(&self.fallback_phrase) {
            return true;
        }

        let significant: Vec<&str> = self
            .fallback_phrase
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.chars().count() > 3)
            .collect();
        if !significant.is_empty() {
            let matches = significant
                .iter()
                .filter(|word| answer.contains(*word))
                .count();
            if matches * 2 >= significant.len() {
                return true;
            }
        }

        FALLBACK_INDICATORS
            .iter()
            .any(|indicator| answer.contains(indicator))
    }
}
