use crate::llm::client::{GenerationConstraints, LLMClient};
use crate::types::{ResearchError, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

/// Client for OpenAI and OpenAI-compatible chat completion endpoints.
pub struct OpenAIClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIClient {
    pub fn new(api_key: String, api_base: String, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn map_error(e: OpenAIError) -> ResearchError {
    match e {
        OpenAIError::Reqwest(inner) if inner.is_timeout() => {
            ResearchError::Timeout(format!("OpenAI error: {}", inner))
        }
        OpenAIError::Reqwest(inner) if inner.is_connect() => {
            ResearchError::Unavailable(format!("OpenAI error: {}", inner))
        }
        other => ResearchError::from_provider_message("OpenAI", other.to_string()),
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    #[allow(deprecated)]
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(constraints.temperature)
            .max_tokens(constraints.max_tokens)
            .messages(vec![
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
                    system.to_string(),
                )),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(
                    prompt.to_string(),
                )),
            ])
            .build()
            .map_err(|e| ResearchError::Internal(format!("Failed to build request: {}", e)))?;

        let response = self.client.chat().create(request).await.map_err(map_error)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ResearchError::InvalidResponse("No response from OpenAI".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
