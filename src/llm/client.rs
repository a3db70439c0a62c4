use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use super::{ChatBackend, ChatRequest};
use crate::config::Config;
use crate::models::Role;
use crate::prompt::{datetime_context, facts_block};

pub struct LlmClient {
    chat_client: Client<OpenAIConfig>,
    chat_model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let chat_config = OpenAIConfig::new()
            .with_api_base(&config.openai_base_url)
            .with_api_key(&config.openai_api_key);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()?;

        Ok(Self {
            chat_client: Client::with_config(chat_config).with_http_client(http_client),
            chat_model: config.model_text.clone(),
            temperature: config.temperature,
        })
    }

    /// Maps a request onto chat messages: system prompt, background facts and
    /// date context as system messages, then history, then the question.
    pub fn build_messages(
        request: &ChatRequest,
    ) -> anyhow::Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system_prompt.clone())
                .build()?
                .into(),
        ];

        if let Some(block) = facts_block(&request.facts) {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(block)
                    .build()?
                    .into(),
            );
        }

        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(datetime_context())
                .build()?
                .into(),
        );

        for interaction in &request.history {
            if interaction.content.trim().is_empty() {
                continue;
            }
            let message: ChatCompletionRequestMessage = match interaction.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(interaction.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(interaction.content.clone())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.question.clone())
                .build()?
                .into(),
        );
        Ok(messages)
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<String> {
        let messages = Self::build_messages(&request)?;
        debug!("LLM: Sending {} messages", messages.len());

        let completion = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(self.temperature)
            .messages(messages)
            .build()?;

        info!("LLM: Text request to model {}", self.chat_model);
        let response = self.chat_client.chat().create(completion).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interaction;
    use chrono::Utc;

    fn interaction(role: Role, content: &str) -> Interaction {
        Interaction {
            timestamp: Utc::now(),
            role,
            content: content.to_string(),
            meta: None,
        }
    }

    #[test]
    fn test_build_messages_layout() {
        let request = ChatRequest {
            system_prompt: "be brief".to_string(),
            facts: vec!["Backups are mandatory".to_string()],
            history: vec![
                interaction(Role::User, "CAD case 5 failed"),
                interaction(Role::Assistant, "  "),
                interaction(Role::Assistant, "Case 5 needs recalibration"),
            ],
            question: "What now?".to_string(),
        };

        let messages = LlmClient::build_messages(&request).unwrap();
        // system, facts, datetime, 2 history (blank skipped), question
        assert_eq!(messages.len(), 6);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[3], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[4], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[5], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_build_messages_without_facts() {
        let request = ChatRequest {
            system_prompt: "be brief".to_string(),
            facts: Vec::new(),
            history: Vec::new(),
            question: "Hello".to_string(),
        };
        let messages = LlmClient::build_messages(&request).unwrap();
        assert_eq!(messages.len(), 3);
    }
}
