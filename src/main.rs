use ki_kumpel::config::Config;
use ki_kumpel::knowledge::{load_hints, KeywordExtractor, KnowledgeBuilder};
use ki_kumpel::llm::LlmClient;
use ki_kumpel::prompt::format_interaction;
use ki_kumpel::refresher::FactRefresher;
use ki_kumpel::style::{load_samples, StyleProfile};
use ki_kumpel::{AssistantRouter, MemoryStore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Starting with {:?}", config);

    let store = MemoryStore::open(&config.database_path)?;
    let extractor = KeywordExtractor::default().with_hints(load_hints(&config.knowledge_hints_path));
    let knowledge = KnowledgeBuilder::new(store.clone())
        .with_extractor(extractor)
        .with_window(config.refresh_window)
        .with_top_k(config.relevant_facts);

    let style = StyleProfile::from_samples(&load_samples(&config.style_sample_dir));
    if style.is_none() {
        info!("No style samples found, answers are passed through unchanged");
    }

    let router = AssistantRouter::new(store, knowledge.clone(), Arc::new(LlmClient::new(&config)?))
        .with_style(style)
        .with_system_prompt(config.system_prompt.clone())
        .with_context_limit(config.context_limit);

    let refresher = tokio::spawn(FactRefresher::new(knowledge, config.refresh_interval).run());

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all(b"ki-kumpel ready. Commands: /facts, /recent [n], /refresh, /quit\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let output = match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
            ("", _) => String::new(),
            ("/quit", _) | ("/exit", _) => break,
            ("/refresh", _) => format!("{} new facts\n", router.refresh_facts().await),
            ("/facts", _) => match router.all_facts().await {
                Ok(facts) if facts.is_empty() => "No facts yet.\n".to_string(),
                Ok(facts) => facts
                    .iter()
                    .map(|f| format!("[{}] {} ({})\n", f.importance, f.fact, f.source))
                    .collect(),
                Err(e) => format!("Could not read facts: {e}\n"),
            },
            ("/recent", arg) => {
                let limit = arg.parse().unwrap_or(10);
                match router.recent_interactions(limit).await {
                    Ok(log) => log.iter().map(|i| format!("{}\n", format_interaction(i))).collect(),
                    Err(e) => format!("Could not read history: {e}\n"),
                }
            }
            _ => match router.handle_text(line).await {
                Ok(answer) => format!("{answer}\n"),
                Err(e) => {
                    error!("Assistant error: {:?}", e);
                    format!("Assistant error: {e}\n")
                }
            },
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    refresher.abort();
    let _ = refresher.await;
    router.shutdown()?;
    info!("Shut down cleanly");
    Ok(())
}
