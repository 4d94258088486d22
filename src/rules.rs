use crate::config::EvalSettings;
use crate::models::RuleViolation;

/// Result of the deterministic style checks.
#[derive(Debug, Clone)]
pub struct RuleReport {
    /// `1 - sum(violation weights)`, floored at 0
    pub score: f64,
    pub violations: Vec<RuleViolation>,
}

/// Deterministic style rule checker.
///
/// Pure and stateless after construction, safe to call from any number of
/// concurrent evaluations.
#[derive(Debug, Clone)]
pub struct RuleChecker {
    emoji_weight: f64,
    exclamation_weight: f64,
    length_weight: f64,
    max_exclamations: usize,
    max_response_chars: usize,
}

impl RuleChecker {
    pub fn new(settings: &EvalSettings) -> Self {
        Self {
            emoji_weight: settings.emoji_weight,
            exclamation_weight: settings.exclamation_weight,
            length_weight: settings.length_weight,
            max_exclamations: settings.max_exclamations,
            max_response_chars: settings.max_response_chars,
        }
    }

    pub fn check(&self, text: &str) -> RuleReport {
        let mut violations = Vec::new();
        let mut penalty = 0.0;

        if text.chars().any(is_emoji) {
            violations.push(RuleViolation::EmojiPresent);
            penalty += self.emoji_weight;
        }

        let exclamations = text.chars().filter(|c| *c == '!').count();
        if exclamations > self.max_exclamations {
            violations.push(RuleViolation::ExcessiveExclamation);
            penalty += self.exclamation_weight;
        }

        if text.chars().count() > self.max_response_chars {
            violations.push(RuleViolation::ResponseTooLong);
            penalty += self.length_weight;
        }

        RuleReport {
            score: (1.0 - penalty).max(0.0),
            violations,
        }
    }
}

/// Emoji and pictograph blocks that trip the emoji rule.
fn is_emoji(c: char) -> bool {
    matches!(c,
        '\u{1F300}'..='\u{1F5FF}' // symbols & pictographs
        | '\u{1F600}'..='\u{1F64F}' // emoticons
        | '\u{1F680}'..='\u{1F6FF}' // transport & map
        | '\u{1F900}'..='\u{1F9FF}' // supplemental symbols
        | '\u{1FA70}'..='\u{1FAFF}' // extended pictographs
        | '\u{1F1E6}'..='\u{1F1FF}' // regional indicators (flags)
        | '\u{2600}'..='\u{26FF}'   // misc symbols
        | '\u{2700}'..='\u{27BF}'   // dingbats
        | '\u{FE0F}'                // variation selector-16
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalSettings;
    use crate::models::RuleViolation;

    fn checker() -> RuleChecker {
        RuleChecker::new(&EvalSettings::default())
    }

    #[test]
    fn clean_text_scores_one() {
        let report = checker().check("Ваш заказ уже в пути, ожидайте доставку завтра.");
        assert_eq!(report.score, 1.0);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn emoji_alone_costs_its_weight() {
        let report = checker().check("Ваш заказ уже в пути 🚚");
        assert_eq!(report.violations, vec![RuleViolation::EmojiPresent]);
        assert!((report.score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn single_exclamation_is_allowed() {
        let report = checker().check("Отличный выбор!");
        assert!(report.violations.is_empty());
        assert_eq!(report.score, 1.0);
    }

    #[test]
    fn exclamations_over_threshold_are_flagged() {
        let report = checker().check("Ура!! Заказ оформлен!");
        assert_eq!(report.violations, vec![RuleViolation::ExcessiveExclamation]);
        assert!((report.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn long_response_is_flagged() {
        let long = "а".repeat(601);
        let report = checker().check(&long);
        assert_eq!(report.violations, vec![RuleViolation::ResponseTooLong]);
        assert!((report.score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn penalties_stack_and_floor_at_zero() {
        let mut settings = EvalSettings::default();
        settings.emoji_weight = 0.6;
        settings.exclamation_weight = 0.3;
        settings.length_weight = 0.3;
        let checker = RuleChecker::new(&settings);

        let text = format!("🎉!!! {}", "слово ".repeat(120));
        let report = checker.check(&text);
        assert_eq!(report.violations.len(), 3);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn check_is_idempotent() {
        let checker = checker();
        let text = "Спасибо за обращение! 🙂";
        let first = checker.check(text);
        let second = checker.check(text);
        assert_eq!(first.score, second.score);
        assert_eq!(first.violations, second.violations);
    }
}
