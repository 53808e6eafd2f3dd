//! Local-model completion backend for the memory workers.
//!
//! Routes Librarian and Compressor calls through the shared dispatcher to
//! the local backend. Cloud providers are never used for extraction.

use std::sync::Arc;

use async_trait::async_trait;

use tb_domain::chat::{ChatCompletionRequest, ChatMessage, MessageContent};
use tb_domain::error::{Error, Result};
use tb_memory::workers::LocalModel;
use tb_providers::{build_provider_request, Dispatcher, ProviderRegistry};

pub struct DispatcherLocalModel {
    dispatcher: Arc<Dispatcher>,
    providers: Arc<ProviderRegistry>,
    model: String,
}

impl DispatcherLocalModel {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        providers: Arc<ProviderRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            providers,
            model: model.into(),
        }
    }
}

#[async_trait]
impl LocalModel for DispatcherLocalModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let handle = self
            .providers
            .local()
            .ok_or_else(|| Error::Config("no local backend configured".into()))?;

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(system),
                ChatMessage {
                    role: "user".into(),
                    content: MessageContent::Text(user.to_string()),
                },
            ],
            stream: false,
            temperature: Some(0.0),
            max_tokens: None,
            tools: vec![],
        };

        let body = build_provider_request(handle.kind(), &request, &self.model, false);
        let outcome = self.dispatcher.chat(handle, &body, &self.model).await?;
        Ok(outcome.text)
    }
}
