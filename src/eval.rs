use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bot::Responder;
use crate::citations::CitationValidator;
use crate::config::EvalSettings;
use crate::error::EvalError;
use crate::grader::Grader;
use crate::models::{BotResponse, EvalPrompt, ItemResult};
use crate::rules::RuleChecker;
use crate::runner::{BatchRunner, RateLimiter, with_retries};
use crate::scoring;

/// An item whose response never materialized; the batch carries on.
fn generation_failed(prompt: &EvalPrompt, err: &EvalError) -> ItemResult {
    warn!(prompt = %prompt.text, error = %err, "response generation failed");
    ItemResult {
        prompt: prompt.clone(),
        response: BotResponse::default(),
        rule_score: None,
        rule_violations: None,
        model_score: None,
        model_rationale: None,
        citations_checked: None,
        combined_score: None,
        passed: false,
        reason: "generation_failed".to_string(),
    }
}

/// Evaluate one prompt in style mode: generate, rule-check, judge-grade
/// with retries, blend. Bot and judge calls draw on separate rate budgets.
pub async fn evaluate_style_item<B: Responder, G: Grader>(
    settings: &EvalSettings,
    bot: &B,
    grader: &G,
    rules: &RuleChecker,
    bot_limiter: &RateLimiter,
    judge_limiter: &RateLimiter,
    prompt: &EvalPrompt,
) -> ItemResult {
    bot_limiter.acquire().await;
    let response = match bot.generate(&prompt.text).await {
        Ok(response) => response,
        Err(err) => return generation_failed(prompt, &err),
    };

    let rule_report = rules.check(&response.text);

    let prompt_text = prompt.text.clone();
    let answer_text = response.text.clone();
    let verdict = with_retries(
        settings.max_retries,
        Duration::from_millis(settings.retry_base_ms),
        || {
            let prompt_text = prompt_text.clone();
            let answer_text = answer_text.clone();
            async move {
                judge_limiter.acquire().await;
                grader.grade(&prompt_text, &answer_text).await
            }
        },
    )
    .await;

    match verdict {
        Ok(verdict) => {
            let combined = scoring::blend(settings, rule_report.score, Some(verdict.score));
            let passed = combined.is_some_and(|score| score >= settings.pass_threshold);
            ItemResult {
                prompt: prompt.clone(),
                response,
                rule_score: Some(rule_report.score),
                rule_violations: Some(rule_report.violations),
                model_score: Some(verdict.score),
                model_rationale: Some(verdict.rationale),
                citations_checked: None,
                combined_score: combined,
                passed,
                reason: if passed { "passed" } else { "below_threshold" }.to_string(),
            }
        }
        Err(err) => {
            // retries exhausted; keep the rule score but never blend without
            // the judge's half of the contract
            warn!(prompt = %prompt.text, error = %err, "grading failed after retries");
            ItemResult {
                prompt: prompt.clone(),
                response,
                rule_score: Some(rule_report.score),
                rule_violations: Some(rule_report.violations),
                model_score: None,
                model_rationale: None,
                citations_checked: None,
                combined_score: None,
                passed: false,
                reason: "grading_failed".to_string(),
            }
        }
    }
}

/// Evaluate one prompt in RAG mode: generate, then the deterministic
/// citation/abstention check.
pub async fn evaluate_rag_item<B: Responder>(
    bot: &B,
    validator: &CitationValidator,
    limiter: &RateLimiter,
    prompt: &EvalPrompt,
) -> ItemResult {
    limiter.acquire().await;
    let response = match bot.generate(&prompt.text).await {
        Ok(response) => response,
        Err(err) => return generation_failed(prompt, &err),
    };

    let verdict = validator.validate(prompt, &response);
    ItemResult {
        prompt: prompt.clone(),
        response,
        rule_score: None,
        rule_violations: None,
        model_score: None,
        model_rationale: None,
        citations_checked: Some(verdict.citations_checked),
        combined_score: Some(if verdict.passed { 1.0 } else { 0.0 }),
        passed: verdict.passed,
        reason: verdict.reason.to_string(),
    }
}

/// Fan the style batch out through the bounded runner.
pub async fn run_style<B: Responder, G: Grader>(
    settings: &EvalSettings,
    bot: &B,
    grader: &G,
    prompts: &[EvalPrompt],
    cancel: &CancellationToken,
) -> Vec<ItemResult> {
    let rules = RuleChecker::new(settings);
    let bot_limiter = RateLimiter::per_minute(settings.rate_limit_rpm);
    let judge_limiter = RateLimiter::per_minute(settings.eval_rate_limit_rpm);
    let runner = BatchRunner::new(settings.max_concurrent);
    info!(
        total = prompts.len(),
        max_concurrent = settings.max_concurrent,
        "starting style evaluation batch"
    );

    let rules = &rules;
    let bot_limiter = &bot_limiter;
    let judge_limiter = &judge_limiter;
    runner
        .run(prompts, cancel, |_, prompt| async move {
            evaluate_style_item(settings, bot, grader, rules, bot_limiter, judge_limiter, prompt)
                .await
        })
        .await
}

/// Fan the RAG batch out through the bounded runner.
pub async fn run_rag<B: Responder>(
    settings: &EvalSettings,
    bot: &B,
    validator: &CitationValidator,
    prompts: &[EvalPrompt],
    cancel: &CancellationToken,
) -> Vec<ItemResult> {
    let limiter = RateLimiter::per_minute(settings.rate_limit_rpm);
    let runner = BatchRunner::new(settings.max_concurrent);
    info!(
        total = prompts.len(),
        max_concurrent = settings.max_concurrent,
        "starting RAG evaluation batch"
    );

    let limiter = &limiter;
    runner
        .run(prompts, cancel, |_, prompt| async move {
            evaluate_rag_item(bot, validator, limiter, prompt).await
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Citation, ModelVerdict};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bot stub: echoes the prompt, fails on "boom", cites on "cited",
    /// abstains on "oos".
    struct StubBot;

    impl Responder for StubBot {
        async fn generate(&self, prompt: &str) -> Result<BotResponse, EvalError> {
            if prompt.contains("boom") {
                return Err(EvalError::Generation("stub blew up".to_string()));
            }
            if prompt.contains("oos") {
                return Ok(BotResponse {
                    text: "Не знаю, уточните у поддержки".to_string(),
                    citations: vec![],
                });
            }
            let citations = if prompt.contains("cited") {
                vec![Citation {
                    source: "faq.pdf".to_string(),
                    page: Some(3),
                    snippet: "returns within 30 days".to_string(),
                }]
            } else {
                vec![]
            };
            Ok(BotResponse {
                text: format!("Ответ на: {prompt}"),
                citations,
            })
        }
    }

    /// Grader stub: fixed score, times out on "slow", counts calls.
    struct StubGrader {
        score: f64,
        calls: AtomicUsize,
    }

    impl StubGrader {
        fn scoring(score: f64) -> Self {
            Self {
                score,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Grader for StubGrader {
        async fn grade(&self, prompt: &str, _response: &str) -> Result<ModelVerdict, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.contains("slow") {
                return Err(EvalError::GradingTimeout(Duration::from_secs(15)));
            }
            Ok(ModelVerdict {
                score: self.score,
                rationale: "stub rationale".to_string(),
            })
        }
    }

    fn fast_settings() -> EvalSettings {
        let mut settings = EvalSettings::default();
        settings.rate_limit_rpm = 0.0;
        settings.retry_base_ms = 1;
        settings
    }

    #[tokio::test]
    async fn style_item_blends_rule_and_model_scores() {
        let settings = fast_settings();
        let grader = StubGrader::scoring(0.9);
        let rules = RuleChecker::new(&settings);
        let limiter = RateLimiter::per_minute(0.0);
        let prompt = EvalPrompt::in_scope("Где мой заказ?", "style");

        let item = evaluate_style_item(
            &settings, &StubBot, &grader, &rules, &limiter, &limiter, &prompt,
        )
        .await;

        assert_eq!(item.rule_score, Some(1.0));
        assert_eq!(item.model_score, Some(0.9));
        let combined = item.combined_score.unwrap();
        assert!((combined - 0.94).abs() < 1e-9);
        assert!(item.passed);
        assert_eq!(item.reason, "passed");
    }

    #[tokio::test]
    async fn grading_timeout_exhausts_retries_and_marks_the_item() {
        let settings = fast_settings();
        let grader = StubGrader::scoring(0.9);
        let rules = RuleChecker::new(&settings);
        let limiter = RateLimiter::per_minute(0.0);
        let prompt = EvalPrompt::in_scope("slow вопрос", "style");

        let item = evaluate_style_item(
            &settings, &StubBot, &grader, &rules, &limiter, &limiter, &prompt,
        )
        .await;

        assert!(!item.passed);
        assert_eq!(item.reason, "grading_failed");
        assert!(item.model_score.is_none());
        assert!(item.combined_score.is_none());
        // rule score is still recorded for the report
        assert!(item.rule_score.is_some());
        // first attempt plus max_retries
        assert_eq!(
            grader.calls.load(Ordering::SeqCst),
            settings.max_retries as usize + 1
        );
    }

    #[tokio::test]
    async fn judge_budget_is_not_spent_by_bot_calls() {
        let settings = fast_settings();
        let grader = StubGrader::scoring(0.9);
        let rules = RuleChecker::new(&settings);
        // 1200 rpm = one slot every 50ms per endpoint
        let bot_limiter = RateLimiter::per_minute(1200.0);
        let judge_limiter = RateLimiter::per_minute(1200.0);
        let prompt = EvalPrompt::in_scope("Где мой заказ?", "style");

        let start = std::time::Instant::now();
        let item = evaluate_style_item(
            &settings,
            &StubBot,
            &grader,
            &rules,
            &bot_limiter,
            &judge_limiter,
            &prompt,
        )
        .await;

        assert!(item.passed);
        // first admission on each budget is immediate; the judge call is not
        // queued behind the bot's slot
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn one_failing_item_never_aborts_its_siblings() {
        let settings = fast_settings();
        let grader = StubGrader::scoring(0.9);
        let cancel = CancellationToken::new();
        let prompts = vec![
            EvalPrompt::in_scope("Первый вопрос", "style"),
            EvalPrompt::in_scope("slow вопрос", "style"),
            EvalPrompt::in_scope("boom вопрос", "style"),
            EvalPrompt::in_scope("Последний вопрос", "style"),
        ];

        let items = run_style(&settings, &StubBot, &grader, &prompts, &cancel).await;

        assert_eq!(items.len(), 4);
        assert!(items[0].passed);
        assert_eq!(items[1].reason, "grading_failed");
        assert_eq!(items[2].reason, "generation_failed");
        assert!(items[3].passed);
        // output order equals input order
        assert_eq!(items[0].prompt.text, "Первый вопрос");
        assert_eq!(items[3].prompt.text, "Последний вопрос");
    }

    #[tokio::test]
    async fn rag_items_pass_and_fail_on_citations() {
        let settings = fast_settings();
        let validator = CitationValidator::new("Не знаю, уточните у поддержки");
        let cancel = CancellationToken::new();
        let prompts = vec![
            EvalPrompt::in_scope("cited: условия возврата", "returns"),
            EvalPrompt::in_scope("вопрос без цитат", "returns"),
            EvalPrompt {
                text: "oos: погода на Марсе".to_string(),
                category: "offtopic".to_string(),
                out_of_scope: true,
            },
        ];

        let items = run_rag(&settings, &StubBot, &validator, &prompts, &cancel).await;

        assert_eq!(items.len(), 3);
        assert!(items[0].passed);
        assert_eq!(items[0].combined_score, Some(1.0));
        assert_eq!(items[0].citations_checked, Some(1));
        assert!(!items[1].passed);
        assert_eq!(items[1].reason, "no_citations");
        assert_eq!(items[1].combined_score, Some(0.0));
        assert!(items[2].passed);
        assert_eq!(items[2].reason, "correct_fallback");
    }

    #[tokio::test]
    async fn rag_generation_failure_is_recorded_and_batch_continues() {
        let settings = fast_settings();
        let validator = CitationValidator::new("Не знаю");
        let cancel = CancellationToken::new();
        let prompts = vec![
            EvalPrompt::in_scope("boom", "returns"),
            EvalPrompt::in_scope("cited: возврат", "returns"),
        ];

        let items = run_rag(&settings, &StubBot, &validator, &prompts, &cancel).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].reason, "generation_failed");
        assert!(items[0].failed_to_evaluate());
        assert!(items[1].passed);
    }
}
