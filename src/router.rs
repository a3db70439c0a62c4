//! Orchestrates one conversational turn between the memory store, the
//! knowledge builder, the model and the style transform.

use std::sync::Arc;
use tracing::{info, warn};

use crate::db::MemoryStore;
use crate::knowledge::KnowledgeBuilder;
use crate::llm::{ChatBackend, ChatRequest};
use crate::models::{Fact, Interaction, InteractionMeta, Role};
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::style::StyleProfile;

pub const DEFAULT_CONTEXT_LIMIT: usize = 30;

pub struct AssistantRouter {
    store: MemoryStore,
    knowledge: KnowledgeBuilder,
    style: Option<StyleProfile>,
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
    context_limit: usize,
}

impl AssistantRouter {
    pub fn new(store: MemoryStore, knowledge: KnowledgeBuilder, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            store,
            knowledge,
            style: None,
            backend,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }

    pub fn with_style(mut self, style: Option<StyleProfile>) -> Self {
        self.style = style;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit.max(1);
        self
    }

    /// Answers a typed question.
    ///
    /// Storage problems degrade the turn (no history, no facts, nothing
    /// persisted) but never fail it; only a model error is returned.
    pub async fn handle_text(&self, question: &str) -> anyhow::Result<String> {
        info!("Router: Text question ({} chars)", question.chars().count());

        let limit = self.context_limit;
        let history = self
            .store
            .run_blocking(move |db| db.get_recent_interactions(limit))
            .await
            .unwrap_or_else(|e| {
                warn!("Router: Could not load context, continuing without it: {}", e);
                Vec::new()
            });

        self.record(Role::User, question).await;
        let facts = self.relevant_facts_after_refresh(question).await;

        let request = ChatRequest {
            system_prompt: self.system_prompt.clone(),
            facts: facts.into_iter().map(|f| f.fact).collect(),
            history,
            question: question.to_string(),
        };
        let answer = self.backend.complete(request).await?;

        let styled = match &self.style {
            Some(profile) => profile.apply(&answer),
            None => answer,
        };
        self.record(Role::Assistant, &styled).await;

        info!("Router: Answer ready ({} chars)", styled.chars().count());
        Ok(styled)
    }

    pub async fn relevant_facts(&self, query: &str) -> Vec<Fact> {
        let knowledge = self.knowledge.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || knowledge.get_relevant_facts(&query))
            .await
            .unwrap_or_else(|e| {
                warn!("Router: Fact lookup task failed: {}", e);
                Vec::new()
            })
    }

    pub async fn recent_interactions(&self, limit: usize) -> anyhow::Result<Vec<Interaction>> {
        self.store
            .run_blocking(move |db| db.get_recent_interactions(limit))
            .await
    }

    pub async fn all_facts(&self) -> anyhow::Result<Vec<Fact>> {
        self.store.run_blocking(|db| db.get_all_facts()).await
    }

    pub async fn refresh_facts(&self) -> usize {
        let knowledge = self.knowledge.clone();
        tokio::task::spawn_blocking(move || knowledge.refresh_facts())
            .await
            .unwrap_or_else(|e| {
                warn!("Router: Refresh task failed: {}", e);
                0
            })
    }

    /// Closes the store. Background refreshers must be stopped first or the
    /// connection stays open until they drop their handle.
    pub fn shutdown(self) -> anyhow::Result<()> {
        let Self {
            store, knowledge, ..
        } = self;
        drop(knowledge);
        store.close()?;
        Ok(())
    }

    async fn record(&self, role: Role, content: &str) {
        let content = content.to_string();
        let result = self
            .store
            .run_blocking(move |db| {
                db.add_interaction(role, &content, Some(&InteractionMeta::with_kind("text")))
            })
            .await;
        if let Err(e) = result {
            warn!("Router: Could not persist {} message, session continues unsaved: {}", role, e);
        }
    }

    async fn relevant_facts_after_refresh(&self, query: &str) -> Vec<Fact> {
        let knowledge = self.knowledge.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || {
            knowledge.refresh_facts();
            knowledge.get_relevant_facts(&query)
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Router: Knowledge task failed: {}", e);
            Vec::new()
        })
    }
}
