use async_openai::{Client, config::OpenAIConfig, types::CreateChatCompletionRequestArgs};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::{EvalSettings, StyleGuide};
use crate::error::EvalError;
use crate::grader::extract_embedded_json;
use crate::models::{BotResponse, Citation};

/// The single capability the evaluator needs from the bot under test:
/// given a prompt, produce a response with optional citations.
pub trait Responder {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<BotResponse, EvalError>>;
}

/// Customer-service bot driven over an OpenAI-compatible chat endpoint.
///
/// Asks the model for a structured JSON answer so citations come back as
/// data, not prose. Any failure, including a malformed answer, is a
/// `Generation` error recorded against the item.
pub struct OpenAiBot {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
    system_prompt: String,
}

impl OpenAiBot {
    pub fn from_settings(settings: &EvalSettings, guide: &StyleGuide) -> anyhow::Result<Self> {
        let api_key = std::env::var(&settings.env_var_api_key).map_err(|_| {
            anyhow::anyhow!("Environment variable {} not found", settings.env_var_api_key)
        })?;
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&settings.api_endpoint);
        let persona = guide.persona_prompt(&settings.person)?;
        Ok(Self::with_config(config, settings, &persona))
    }

    pub fn with_config(config: OpenAIConfig, settings: &EvalSettings, persona: &str) -> Self {
        let system_prompt = format!(
            "{persona}\n\n\
             Отвечай на вопросы клиентов, используя информацию из базы знаний магазина.\n\
             Если ответ опирается на документы, укажи их в citations; если информации \
             нет, используй фразу при отсутствии данных и оставь citations пустым.\n\
             Верни JSON вида {{\"answer\": \"текст ответа\", \"citations\": \
             [{{\"source\": \"файл\", \"page\": 1, \"snippet\": \"цитата\"}}]}}. \
             Только JSON, без другого текста."
        );
        Self {
            client: Client::with_config(config),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.request_timeout_secs),
            system_prompt,
        }
    }
}

impl Responder for OpenAiBot {
    async fn generate(&self, prompt: &str) -> Result<BotResponse, EvalError> {
        let system_message = async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
            .content(self.system_prompt.clone())
            .build()
            .map_err(|e| EvalError::Generation(format!("failed to build request: {e}")))?
            .into();
        let user_message = async_openai::types::ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| EvalError::Generation(format!("failed to build request: {e}")))?
            .into();
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([system_message, user_message])
            .temperature(self.temperature as f32)
            .max_tokens(self.max_tokens as u16)
            .build()
            .map_err(|e| EvalError::Generation(format!("failed to build request: {e}")))?;

        let response = match tokio::time::timeout(
            self.timeout,
            self.client.chat().create(request),
        )
        .await
        {
            Err(_) => {
                return Err(EvalError::Generation(format!(
                    "bot call timed out after {:?}",
                    self.timeout
                )));
            }
            Ok(Err(e)) => return Err(EvalError::Generation(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| EvalError::Generation("bot returned an empty completion".to_string()))?;
        debug!(raw = %content, "bot answer received");

        parse_structured_answer(&content)
    }
}

#[derive(Debug, Deserialize)]
struct StructuredAnswer {
    answer: String,
    #[serde(default)]
    citations: Vec<Citation>,
}

fn parse_structured_answer(raw: &str) -> Result<BotResponse, EvalError> {
    let json = extract_embedded_json(raw)
        .ok_or_else(|| EvalError::Generation(format!("no JSON object in bot answer: {raw}")))?;
    let answer: StructuredAnswer = serde_json::from_str(json)
        .map_err(|e| EvalError::Generation(format!("bot answer does not match shape: {e}")))?;
    Ok(BotResponse {
        text: answer.answer,
        citations: answer.citations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_answer_with_citations() {
        let raw = r#"{"answer": "Возврат в течение 30 дней.",
                      "citations": [{"source": "faq.pdf", "page": 3, "snippet": "30 дней"}]}"#;
        let response = parse_structured_answer(raw).unwrap();
        assert_eq!(response.text, "Возврат в течение 30 дней.");
        assert_eq!(response.citations.len(), 1);
        assert!(response.citations[0].is_complete());
    }

    #[test]
    fn citations_default_to_empty() {
        let response = parse_structured_answer(r#"{"answer": "Не знаю"}"#).unwrap();
        assert!(response.citations.is_empty());
    }

    #[test]
    fn prose_around_the_json_is_tolerated() {
        let raw = r#"Вот мой ответ: {"answer": "Здравствуйте"} спасибо"#;
        let response = parse_structured_answer(raw).unwrap();
        assert_eq!(response.text, "Здравствуйте");
    }

    #[test]
    fn malformed_answer_is_a_generation_error() {
        let err = parse_structured_answer("просто текст без структуры").unwrap_err();
        assert!(matches!(err, EvalError::Generation(_)));

        let err = parse_structured_answer(r#"{"reply": "не то поле"}"#).unwrap_err();
        assert!(matches!(err, EvalError::Generation(_)));
    }

    #[tokio::test]
    async fn generates_through_a_stubbed_endpoint() {
        let body = serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "{\"answer\": \"Заказ в пути.\", \"citations\": []}"
                },
                "finish_reason": "stop",
                "logprobs": null
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 10, "total_tokens": 15}
        })
        .to_string();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base(server.url());
        let bot = OpenAiBot::with_config(config, &EvalSettings::default(), "Ты Алекс.");
        let response = bot.generate("Где мой заказ?").await.unwrap();
        assert_eq!(response.text, "Заказ в пути.");
        mock.assert_async().await;
    }
}
