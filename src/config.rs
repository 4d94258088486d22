use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::EvalPrompt;

/// Tunable evaluation parameters, loaded once at startup.
///
/// Every field has a documented default so a run works without a settings
/// file; a TOML file passed via `--config` overrides selectively.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvalSettings {
    /// OpenAI-compatible endpoint used to drive the bot under test
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable holding the bot API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Model backing the bot under test
    #[serde(default = "default_model")]
    pub model: String,
    /// Endpoint for the judge model (defaults to the bot endpoint)
    #[serde(default = "default_api_endpoint")]
    pub eval_api_endpoint: String,
    #[serde(default = "default_env_var_api_key")]
    pub eval_env_var_api_key: String,
    /// Judge model used for style grading
    #[serde(default = "default_eval_model")]
    pub eval_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout for bot and judge requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Weight of the deterministic rule score in the blended style score
    #[serde(default = "default_rule_weight")]
    pub rule_weight: f64,
    /// Weight of the judge model score in the blended style score
    #[serde(default = "default_model_weight")]
    pub model_weight: f64,
    /// Blended score at or above this passes the style check
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// RAG batch pass rate compared against this target
    #[serde(default = "default_rag_pass_target")]
    pub rag_pass_target: f64,

    /// Rule-score budget taken by an emoji violation
    #[serde(default = "default_emoji_weight")]
    pub emoji_weight: f64,
    #[serde(default = "default_exclamation_weight")]
    pub exclamation_weight: f64,
    #[serde(default = "default_length_weight")]
    pub length_weight: f64,
    /// More exclamation marks than this is a violation
    #[serde(default = "default_max_exclamations")]
    pub max_exclamations: usize,
    /// Responses longer than this many characters are a violation
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,

    /// Maximum evaluations in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Bot calls per minute; <= 0 disables rate limiting
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: f64,
    /// Judge model calls per minute, budgeted separately from the bot
    #[serde(default = "default_rate_limit_rpm")]
    pub eval_rate_limit_rpm: f64,
    /// Additional judge attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay, doubled per retry
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Persona from the style guide driving bot tone and the judge rubric
    #[serde(default = "default_person")]
    pub person: String,
    #[serde(default = "default_style_guide_path")]
    pub style_guide_path: String,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
}

fn default_api_endpoint() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_env_var_api_key() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_eval_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_rule_weight() -> f64 {
    0.4
}
fn default_model_weight() -> f64 {
    0.6
}
fn default_pass_threshold() -> f64 {
    0.7
}
fn default_rag_pass_target() -> f64 {
    0.8
}
fn default_emoji_weight() -> f64 {
    0.4
}
fn default_exclamation_weight() -> f64 {
    0.2
}
fn default_length_weight() -> f64 {
    0.2
}
fn default_max_exclamations() -> usize {
    1
}
fn default_max_response_chars() -> usize {
    600
}
fn default_max_concurrent() -> usize {
    5
}
fn default_rate_limit_rpm() -> f64 {
    60.0
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_person() -> String {
    "alex".to_string()
}
fn default_style_guide_path() -> String {
    "data/style_guide.yaml".to_string()
}
fn default_reports_dir() -> String {
    "reports".to_string()
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            env_var_api_key: default_env_var_api_key(),
            model: default_model(),
            eval_api_endpoint: default_api_endpoint(),
            eval_env_var_api_key: default_env_var_api_key(),
            eval_model: default_eval_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            rule_weight: default_rule_weight(),
            model_weight: default_model_weight(),
            pass_threshold: default_pass_threshold(),
            rag_pass_target: default_rag_pass_target(),
            emoji_weight: default_emoji_weight(),
            exclamation_weight: default_exclamation_weight(),
            length_weight: default_length_weight(),
            max_exclamations: default_max_exclamations(),
            max_response_chars: default_max_response_chars(),
            max_concurrent: default_max_concurrent(),
            rate_limit_rpm: default_rate_limit_rpm(),
            eval_rate_limit_rpm: default_rate_limit_rpm(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            person: default_person(),
            style_guide_path: default_style_guide_path(),
            reports_dir: default_reports_dir(),
        }
    }
}

impl EvalSettings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings: EvalSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML settings: {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if (self.rule_weight + self.model_weight - 1.0).abs() > 1e-9 {
            anyhow::bail!(
                "rule_weight + model_weight must sum to 1.0, got {}",
                self.rule_weight + self.model_weight
            );
        }
        if !(0.0..=1.0).contains(&self.pass_threshold) {
            anyhow::bail!("pass_threshold must be in [0, 1], got {}", self.pass_threshold);
        }
        if !(0.0..=1.0).contains(&self.rag_pass_target) {
            anyhow::bail!(
                "rag_pass_target must be in [0, 1], got {}",
                self.rag_pass_target
            );
        }
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        Ok(())
    }
}

/// One persona entry in the style guide.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersonDetails {
    pub name: String,
    /// Character description fed into system prompts
    pub person: String,
    #[serde(default)]
    pub avoid: Vec<String>,
    #[serde(default)]
    pub must_include: Vec<String>,
    /// Fallback responses keyed by situation; `no_data` is the abstention phrase
    #[serde(default)]
    pub fallback: BTreeMap<String, String>,
}

impl PersonDetails {
    pub fn no_data_fallback(&self) -> &str {
        self.fallback
            .get("no_data")
            .map(String::as_str)
            .unwrap_or("Извините, у меня нет информации по этому вопросу.")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToneConfig {
    pub persons: BTreeMap<String, PersonDetails>,
    #[serde(default = "default_sentences_max")]
    pub sentences_max: usize,
    #[serde(default = "default_bullets")]
    pub bullets: bool,
}

fn default_sentences_max() -> usize {
    3
}
fn default_bullets() -> bool {
    true
}

/// Brand style guide loaded from YAML, validated once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StyleGuide {
    pub brand: String,
    pub tone: ToneConfig,
}

impl StyleGuide {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read style guide: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse style guide YAML: {}", path.display()))
    }

    /// Look up a persona, listing the available ones on a miss.
    pub fn person(&self, name: &str) -> Result<&PersonDetails> {
        self.tone.persons.get(name).ok_or_else(|| {
            let available: Vec<&str> = self.tone.persons.keys().map(String::as_str).collect();
            anyhow::anyhow!(
                "Person '{}' not found in style guide. Available: {}",
                name,
                available.join(", ")
            )
        })
    }

    /// System prompt section describing the persona's voice and limits,
    /// shared by the bot client and the judge rubric.
    pub fn persona_prompt(&self, name: &str) -> Result<String> {
        let person = self.person(name)?;
        let avoid = person
            .avoid
            .iter()
            .map(|item| format!("  - {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        let must_include = person
            .must_include
            .iter()
            .map(|item| format!("  - {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        let bullets = if self.tone.bullets {
            "Используй списки и маркированные пункты"
        } else {
            "Избегай использования списков"
        };

        Ok(format!(
            "Ты {name} — полезный сотрудник интернет-магазина {brand}.\n\
             Характер: {person}\n\n\
             Избегай:\n{avoid}\n\n\
             Обязательно используй:\n{must_include}\n\n\
             Ограничения:\n\
             - Максимум {sentences} предложений в ответе\n\
             - {bullets}\n\n\
             При отсутствии данных: {fallback}",
            name = person.name,
            brand = self.brand,
            person = person.person,
            sentences = self.tone.sentences_max,
            fallback = person.no_data_fallback(),
        ))
    }
}

/// Style prompt set: one prompt per line, blank lines skipped.
pub fn load_style_prompts(path: &Path) -> Result<Vec<EvalPrompt>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read style prompts: {}", path.display()))?;
    let prompts: Vec<EvalPrompt> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| EvalPrompt::in_scope(line, "style"))
        .collect();
    if prompts.is_empty() {
        anyhow::bail!("Style prompt file is empty: {}", path.display());
    }
    Ok(prompts)
}

#[derive(Debug, Deserialize)]
struct RagPromptFile {
    prompts: Vec<RagPromptEntry>,
}

#[derive(Debug, Deserialize)]
struct RagPromptEntry {
    question: String,
    #[serde(default)]
    oos: bool,
    #[serde(default = "default_category")]
    category: String,
}

fn default_category() -> String {
    "unknown".to_string()
}

/// RAG prompt set: `{ "prompts": [{question, oos, category}] }`.
pub fn load_rag_prompts(path: &Path) -> Result<Vec<EvalPrompt>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read RAG prompts: {}", path.display()))?;
    let file: RagPromptFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse RAG prompts JSON: {}", path.display()))?;
    if file.prompts.is_empty() {
        anyhow::bail!("RAG prompt file has no prompts: {}", path.display());
    }
    Ok(file
        .prompts
        .into_iter()
        .map(|entry| EvalPrompt {
            text: entry.question,
            category: entry.category,
            out_of_scope: entry.oos,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn settings_defaults_match_documented_values() {
        let settings = EvalSettings::default();
        assert_eq!(settings.rule_weight, 0.4);
        assert_eq!(settings.model_weight, 0.6);
        assert_eq!(settings.pass_threshold, 0.7);
        assert_eq!(settings.rag_pass_target, 0.8);
        assert_eq!(settings.emoji_weight, 0.4);
        assert_eq!(settings.max_exclamations, 1);
        assert_eq!(settings.max_response_chars, 600);
        assert_eq!(settings.max_concurrent, 5);
        assert_eq!(settings.max_retries, 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn settings_file_overrides_selectively() {
        let toml_content = r#"
eval_model = "gpt-4o"
pass_threshold = 0.8
max_concurrent = 3
rate_limit_rpm = 30.0
eval_rate_limit_rpm = 20.0
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let settings = EvalSettings::from_file(temp_file.path()).unwrap();
        assert_eq!(settings.eval_model, "gpt-4o");
        assert_eq!(settings.pass_threshold, 0.8);
        assert_eq!(settings.max_concurrent, 3);
        assert_eq!(settings.rate_limit_rpm, 30.0);
        assert_eq!(settings.eval_rate_limit_rpm, 20.0);
        // untouched fields keep their defaults
        assert_eq!(settings.rule_weight, 0.4);
        assert_eq!(settings.person, "alex");
    }

    #[test]
    fn settings_reject_bad_weight_split() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "rule_weight = 0.5\nmodel_weight = 0.6\n").unwrap();

        let err = EvalSettings::from_file(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    fn sample_style_guide() -> String {
        r#"
brand: "Лавка"
tone:
  sentences_max: 3
  bullets: true
  persons:
    alex:
      name: "Алекс"
      person: "дружелюбный и точный"
      avoid:
        - "канцелярит"
      must_include:
        - "обращение на вы"
      fallback:
        no_data: "Не знаю, уточните у поддержки"
"#
        .to_string()
    }

    #[test]
    fn style_guide_loads_and_builds_persona_prompt() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", sample_style_guide()).unwrap();

        let guide = StyleGuide::from_file(temp_file.path()).unwrap();
        assert_eq!(guide.brand, "Лавка");
        assert_eq!(
            guide.person("alex").unwrap().no_data_fallback(),
            "Не знаю, уточните у поддержки"
        );

        let prompt = guide.persona_prompt("alex").unwrap();
        assert!(prompt.contains("Лавка"));
        assert!(prompt.contains("канцелярит"));
        assert!(prompt.contains("Не знаю, уточните у поддержки"));
    }

    #[test]
    fn unknown_person_lists_available_ones() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", sample_style_guide()).unwrap();

        let guide = StyleGuide::from_file(temp_file.path()).unwrap();
        let err = guide.person("pahom").unwrap_err();
        assert!(err.to_string().contains("alex"));
    }

    #[test]
    fn style_prompts_skip_blank_lines() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "Где мой заказ?\n\n  \nКак оформить возврат?\n").unwrap();

        let prompts = load_style_prompts(temp_file.path()).unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].text, "Где мой заказ?");
        assert!(!prompts[0].out_of_scope);
    }

    #[test]
    fn empty_style_prompt_file_is_fatal() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(load_style_prompts(temp_file.path()).is_err());
    }

    #[test]
    fn rag_prompts_parse_with_defaults() {
        let json = r#"{
            "prompts": [
                {"question": "Сколько идёт доставка?", "oos": false, "category": "delivery"},
                {"question": "Какая погода на Марсе?", "oos": true}
            ]
        }"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", json).unwrap();

        let prompts = load_rag_prompts(temp_file.path()).unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].category, "delivery");
        assert!(prompts[1].out_of_scope);
        assert_eq!(prompts[1].category, "unknown");
    }

    #[test]
    fn malformed_rag_prompts_are_fatal() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{{\"prompts\": \"oops\"}}").unwrap();
        assert!(load_rag_prompts(temp_file.path()).is_err());
    }
}
