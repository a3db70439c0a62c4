use crate::knowledge::KnowledgeBuilder;
use tokio::time::Duration;
use tracing::{debug, error, info};

/// Background loop that turns new conversation into facts on a fixed
/// interval.
pub struct FactRefresher {
    knowledge: KnowledgeBuilder,
    interval: Duration,
}

impl FactRefresher {
    pub fn new(knowledge: KnowledgeBuilder, interval: Duration) -> Self {
        Self {
            knowledge,
            interval,
        }
    }

    pub async fn run(self) {
        info!(
            "Fact refresher: running every {}",
            humantime::format_duration(self.interval)
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.refresh_once().await;
        }
    }

    async fn refresh_once(&self) -> usize {
        let knowledge = self.knowledge.clone();
        match tokio::task::spawn_blocking(move || knowledge.refresh_facts()).await {
            Ok(0) => {
                debug!("Fact refresher: nothing new");
                0
            }
            Ok(n) => {
                info!("Fact refresher: stored {} facts", n);
                n
            }
            Err(e) => {
                error!("Fact refresher task error: {}", e);
                0
            }
        }
    }
}
