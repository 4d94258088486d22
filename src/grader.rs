use async_openai::{Client, config::OpenAIConfig, types::CreateChatCompletionRequestArgs};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::{EvalSettings, StyleGuide};
use crate::error::EvalError;
use crate::models::ModelVerdict;

/// Grades a response against the style rubric.
///
/// May suspend (network I/O) and may fail; implementations must map
/// timeouts to `GradingTimeout` so the batch runner can retry them.
pub trait Grader {
    fn grade(
        &self,
        prompt: &str,
        response_text: &str,
    ) -> impl Future<Output = Result<ModelVerdict, EvalError>>;
}

/// Judge-model grader over an OpenAI-compatible chat endpoint.
pub struct JudgeGrader {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    system_prompt: String,
}

impl JudgeGrader {
    /// Build the grader from settings and the style guide; reads the judge
    /// API key from the configured environment variable.
    pub fn from_settings(settings: &EvalSettings, guide: &StyleGuide) -> anyhow::Result<Self> {
        let api_key = std::env::var(&settings.eval_env_var_api_key).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable {} not found",
                settings.eval_env_var_api_key
            )
        })?;
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&settings.eval_api_endpoint);
        let system_prompt = reviewer_prompt(guide, &settings.person)?;
        Ok(Self::with_config(
            config,
            &settings.eval_model,
            Duration::from_secs(settings.request_timeout_secs),
            &system_prompt,
        ))
    }

    pub fn with_config(
        config: OpenAIConfig,
        model: &str,
        timeout: Duration,
        system_prompt: &str,
    ) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout,
            system_prompt: system_prompt.to_string(),
        }
    }
}

impl Grader for JudgeGrader {
    async fn grade(&self, prompt: &str, response_text: &str) -> Result<ModelVerdict, EvalError> {
        let user_content = format!(
            "Вопрос клиента:\n{prompt}\n\n\
             Ответ ассистента:\n{response_text}\n\n\
             Оцени соответствие ответа голосу бренда. Верни JSON вида \
             {{\"score\": <число от 0 до 1>, \"rationale\": \"краткое объяснение\"}}. \
             Только JSON, без другого текста."
        );

        let system_message = async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
            .content(self.system_prompt.clone())
            .build()
            .map_err(|e| EvalError::Grading(format!("failed to build judge request: {e}")))?
            .into();
        let user_message = async_openai::types::ChatCompletionRequestUserMessageArgs::default()
            .content(user_content)
            .build()
            .map_err(|e| EvalError::Grading(format!("failed to build judge request: {e}")))?
            .into();
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([system_message, user_message])
            .temperature(0.1)
            .build()
            .map_err(|e| EvalError::Grading(format!("failed to build judge request: {e}")))?;

        let response = match tokio::time::timeout(
            self.timeout,
            self.client.chat().create(request),
        )
        .await
        {
            Err(_) => return Err(EvalError::GradingTimeout(self.timeout)),
            Ok(Err(e)) => return Err(EvalError::GradingTransport(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| EvalError::Grading("judge returned an empty completion".to_string()))?;
        debug!(raw = %content, "judge verdict received");

        parse_verdict(&content)
    }
}

/// System prompt framing the judge as a brand-voice reviewer.
fn reviewer_prompt(guide: &StyleGuide, person_name: &str) -> anyhow::Result<String> {
    let person = guide.person(person_name)?;
    Ok(format!(
        "Ты — строгий ревьюер соответствия голосу бренда {brand}.\n\
         Тон: {tone}. Избегай: {avoid}. Обязательно: {must_include}.",
        brand = guide.brand,
        tone = person.person,
        avoid = person.avoid.join(", "),
        must_include = person.must_include.join(", "),
    ))
}

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    score: f64,
    rationale: String,
}

/// Locate a JSON object embedded in possibly-chatty model output.
pub(crate) fn extract_embedded_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Strictly parse the judge output into a verdict.
///
/// Tolerates prose around the JSON object, but the object itself must carry
/// a `score` in [0, 1] and a `rationale`; anything else is a grading error,
/// never a default score.
fn parse_verdict(raw: &str) -> Result<ModelVerdict, EvalError> {
    let json = extract_embedded_json(raw)
        .ok_or_else(|| EvalError::Grading(format!("no JSON object in judge output: {raw}")))?;
    let payload: VerdictPayload = serde_json::from_str(json)
        .map_err(|e| EvalError::Grading(format!("verdict does not match expected shape: {e}")))?;
    if !(0.0..=1.0).contains(&payload.score) || !payload.score.is_finite() {
        return Err(EvalError::Grading(format!(
            "verdict score {} outside [0, 1]",
            payload.score
        )));
    }
    Ok(ModelVerdict {
        score: payload.score,
        rationale: payload.rationale,
    })
}
