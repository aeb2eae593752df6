//! # OpenAI-Compatible Backend
//!
//! `GenerationService` over any chat-completions endpoint speaking the
//! OpenAI wire format. Structured-output requests are forwarded as a
//! `json_schema` response format; tool capabilities are forwarded as
//! function definitions and executed locally in a bounded loop until
//! the model produces a final answer.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{GenerationRequest, GenerationResponse, GenerationService};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Upper bound on tool-call rounds within one generation.
const MAX_TOOL_ROUNDS: usize = 8;

pub struct OpenAiService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Configure from the environment: `GENERATION_BASE_URL`,
    /// `GENERATION_API_KEY` (or `OPENAI_API_KEY`), `GENERATION_MODEL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            env::var("GENERATION_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = env::var("GENERATION_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                anyhow::anyhow!("GENERATION_API_KEY or OPENAI_API_KEY must be set")
            })?;
        let model = env::var("GENERATION_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(base_url, api_key, model))
    }

    fn build_payload(&self, request: &GenerationRequest, messages: &[Value]) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(schema) = &request.output_schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "schema": schema,
                },
            });
        }
        if !request.tools.is_empty() {
            payload["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name(),
                                "description": tool.description(),
                                "parameters": tool.parameters_schema(),
                            },
                        })
                    })
                    .collect(),
            );
        }
        payload
    }

    async fn execute_tool(&self, request: &GenerationRequest, call: &ToolCall) -> Value {
        let Some(tool) = request
            .tools
            .iter()
            .find(|t| t.name() == call.function.name)
        else {
            return json!({ "error": format!("unknown tool: {}", call.function.name) });
        };

        let args: Value = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(err) => return json!({ "error": format!("malformed arguments: {err}") }),
        };

        match tool.call(args).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(tool = call.function.name, error = %err, "tool call failed");
                json!({ "error": err.to_string() })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[async_trait]
impl GenerationService for OpenAiService {
    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut messages = vec![json!({ "role": "user", "content": request.prompt })];

        for _ in 0..MAX_TOOL_ROUNDS {
            let payload = self.build_payload(&request, &messages);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("completion request failed ({status}): {body}");
            }

            let completion: ChatCompletionResponse = response.json().await?;
            let Some(choice) = completion.choices.into_iter().next() else {
                anyhow::bail!("completion response had no choices");
            };

            if choice.message.tool_calls.is_empty() {
                return Ok(GenerationResponse::new(
                    choice.message.content.unwrap_or_default(),
                ));
            }

            messages.push(json!({
                "role": "assistant",
                "content": choice.message.content,
                "tool_calls": choice.message.tool_calls.iter().map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.function.name,
                        "arguments": call.function.arguments,
                    },
                })).collect::<Vec<_>>(),
            }));

            for call in &choice.message.tool_calls {
                let result = self.execute_tool(&request, call).await;
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result.to_string(),
                }));
            }
        }

        anyhow::bail!("generation exceeded {MAX_TOOL_ROUNDS} tool rounds")
    }
}
