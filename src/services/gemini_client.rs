use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{ChatModels, Config};
use crate::services::llm::{
    estimate_text_tokens, ChatMessage, ChatPart, ChatRequest, ChatResponse, Embedding,
    EmbeddingClient, GenerativeTextClient, LlmError, ToolCall, ToolDeclaration,
};

/// HTTP client for the Gemini `generateContent` / `embedContent` API.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: ChatModels,
    embedding_model: String,
}

impl GeminiClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            models: ChatModels::default(),
            embedding_model: "text-embedding-004".to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.gemini_base_url.clone(), cfg.gemini_api_key.clone()).with_models(
            cfg.chat_model.clone(),
            cfg.pro_chat_model.clone(),
            cfg.embedding_model.clone(),
        )
    }

    pub fn with_models(mut self, chat: String, pro_chat: String, embedding: String) -> Self {
        self.models = ChatModels {
            standard: chat,
            pro: pro_chat,
        };
        self.embedding_model = embedding;
        self
    }

    fn model_url(&self, model: &str, operation: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, operation)
    }

    fn ensure_configured(&self) -> Result<(), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NotConfigured("missing Gemini API key".to_string()));
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool, LlmError> {
        self.ensure_configured()?;
        let response = self
            .client
            .get(format!("{}/v1beta/models/{}", self.base_url, self.models.standard))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl GenerativeTextClient for GeminiClient {
    async fn generate_chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.ensure_configured()?;
        let model = self.models.model_for(request.use_pro_model);

        let body = GenerateContentRequest::from(&request);

        tracing::debug!(
            model = %model,
            messages = request.messages.len(),
            "Calling generateContent"
        );

        let response = self
            .client
            .post(self.model_url(model, "generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let payload: GenerateContentResponse = response.json().await?;
        Ok(payload.into_chat_response())
    }
}

#[async_trait]
impl EmbeddingClient for GeminiClient {
    async fn generate_embedding(&self, text: &str) -> Result<Embedding, LlmError> {
        self.ensure_configured()?;
        let request = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
        });

        let response = self
            .client
            .post(self.model_url(&self.embedding_model, "embedContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let embed_response: EmbedContentResponse = response.json().await?;
        if embed_response.embedding.values.is_empty() {
            return Err(LlmError::InvalidResponse("empty embedding".to_string()));
        }

        // embedContent does not report usage
        Ok(Embedding {
            values: embed_response.embedding.values,
            token_count: estimate_text_tokens(text),
        })
    }
}

// Request/Response Models
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
}

impl From<&ChatRequest> for GenerateContentRequest {
    fn from(request: &ChatRequest) -> Self {
        let tools = if request.tools.is_empty() {
            vec![]
        } else {
            vec![WireTool {
                function_declarations: request
                    .tools
                    .iter()
                    .map(WireFunctionDeclaration::from)
                    .collect(),
            }]
        };

        Self {
            contents: request.messages.iter().map(WireContent::from).collect(),
            tools,
            system_instruction: request.system_instruction.as_ref().map(|text| WireContent {
                role: None,
                parts: vec![WirePart {
                    text: Some(text.clone()),
                    ..WirePart::default()
                }],
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

impl From<&ChatMessage> for WireContent {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: Some(message.role.as_str().to_string()),
            parts: message.parts.iter().map(WirePart::from).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

impl From<&ChatPart> for WirePart {
    fn from(part: &ChatPart) -> Self {
        match part {
            ChatPart::Text(text) => WirePart {
                text: Some(text.clone()),
                ..WirePart::default()
            },
            ChatPart::ToolCall(call) => WirePart {
                function_call: Some(WireFunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                }),
                ..WirePart::default()
            },
            ChatPart::ToolResponse { name, content } => WirePart {
                function_response: Some(WireFunctionResponse {
                    name: name.clone(),
                    response: json!({ "content": content }),
                }),
                ..WirePart::default()
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDeclaration> for WireFunctionDeclaration {
    fn from(tool: &ToolDeclaration) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    fn into_chat_response(self) -> ChatResponse {
        let total_tokens = self
            .usage_metadata
            .map(|u| u.total_token_count)
            .unwrap_or(0);

        let parts: Vec<ChatPart> = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| {
                        if let Some(call) = part.function_call {
                            Some(ChatPart::ToolCall(ToolCall {
                                name: call.name,
                                args: call.args,
                            }))
                        } else {
                            part.text.map(ChatPart::Text)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        ChatResponse::from_parts(parts, total_tokens)
    }
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}
