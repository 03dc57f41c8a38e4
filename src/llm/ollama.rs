use crate::llm::client::{GenerationConstraints, LLMClient};
use crate::types::{ResearchError, Result};
use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, request::ChatMessageRequest},
    models::ModelOptions,
};

const DEFAULT_PORT: u16 = 11434;

pub struct OllamaClient {
    client: Ollama,
    model: String,
}

impl OllamaClient {
    pub async fn new(base_url: String, model: String) -> Result<Self> {
        let (host, port) = split_host_port(&base_url);
        let client = Ollama::new(host, port);

        Ok(Self { client, model })
    }
}

/// Split `scheme://host:port` into the `(scheme://host, port)` pair Ollama expects.
fn split_host_port(base_url: &str) -> (String, u16) {
    let (scheme, rest) = base_url.split_once("://").unwrap_or(("http", base_url));
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_PORT)),
        None => (rest, DEFAULT_PORT),
    };
    let host = if host.is_empty() { "localhost" } else { host };
    (format!("{}://{}", scheme, host), port)
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String> {
        let messages = vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(prompt.to_string()),
        ];

        let options = ModelOptions::default()
            .temperature(constraints.temperature)
            .num_predict(i32::try_from(constraints.max_tokens).unwrap_or(i32::MAX));
        let request = ChatMessageRequest::new(self.model.clone(), messages).options(options);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| ResearchError::from_provider_message("Ollama", e.to_string()))?;

        let content = response.message.content;
        if content.trim().is_empty() {
            return Err(ResearchError::InvalidResponse(
                "Ollama returned an empty message".to_string(),
            ));
        }
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
