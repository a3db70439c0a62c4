//! Derives timeless facts from the interaction log and answers relevance
//! queries against them.
//!
//! Extraction is a pluggable [`FactExtractor`] strategy; [`KeywordExtractor`]
//! is the pattern-based default.

use crate::db::MemoryStore;
use crate::models::{format_timestamp, Fact, Interaction};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_REFRESH_WINDOW: usize = 200;
pub const DEFAULT_TOP_K: usize = 5;

/// Importance of a statement lifted directly from a message.
pub const IMPORTANCE_EXTRACTED: i64 = 2;
/// Importance of a configured keyword hint.
pub const IMPORTANCE_HINT: i64 = 1;

const DEFAULT_MARKERS: &[&str] = &[
    "muss", "müssen", "soll", "sollen", "wichtig", "immer", "must", "need", "needs", "should",
    "always", "important", "requires", "never",
];

const TRANSIENT_MARKERS: &[&str] = &["heute", "gerade", "jetzt", "today", "right now", "currently"];

const MIN_SENTENCE_WORDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFact {
    pub source: String,
    pub fact: String,
    pub importance: i64,
}

pub trait FactExtractor: Send + Sync {
    fn extract(&self, interactions: &[Interaction]) -> Vec<CandidateFact>;
}

/// Adds `fact` whenever a message in the window mentions `keyword`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordHint {
    pub keyword: String,
    pub fact: String,
}

/// Keeps declarative sentences carrying an obligation/importance marker.
pub struct KeywordExtractor {
    markers: Vec<String>,
    transient: Vec<String>,
    hints: Vec<KeywordHint>,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self {
            markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
            transient: TRANSIENT_MARKERS.iter().map(|m| m.to_string()).collect(),
            hints: Vec::new(),
        }
    }
}

impl KeywordExtractor {
    pub fn with_hints(mut self, hints: Vec<KeywordHint>) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers = markers.into_iter().map(|m| m.into().to_lowercase()).collect();
        self
    }

    fn is_fact_sentence(&self, sentence: &str) -> bool {
        if sentence.ends_with('?') {
            return false;
        }
        let words = tokenize(sentence);
        if sentence.split_whitespace().count() < MIN_SENTENCE_WORDS {
            return false;
        }
        if self.transient.iter().any(|p| contains_phrase(&words, p)) {
            return false;
        }
        self.markers.iter().any(|m| contains_phrase(&words, m))
    }
}

impl FactExtractor for KeywordExtractor {
    fn extract(&self, interactions: &[Interaction]) -> Vec<CandidateFact> {
        let mut candidates = Vec::new();

        for interaction in interactions {
            if interaction.content.trim().is_empty() {
                debug!("KnowledgeBuilder: Skipping empty {} message", interaction.role);
                continue;
            }
            let source = format!("interaction:{}", format_timestamp(interaction.timestamp));
            for sentence in split_sentences(&interaction.content) {
                if self.is_fact_sentence(&sentence) {
                    candidates.push(CandidateFact {
                        source: source.clone(),
                        fact: sentence,
                        importance: IMPORTANCE_EXTRACTED,
                    });
                }
            }
        }

        for hint in &self.hints {
            let keyword = hint.keyword.trim().to_lowercase();
            if keyword.is_empty() {
                continue;
            }
            let mentioned = interactions
                .iter()
                .any(|i| tokenize(&i.content).iter().any(|t| mentions_keyword(t, &keyword)));
            if mentioned {
                candidates.push(CandidateFact {
                    source: format!("heuristic:{keyword}"),
                    fact: hint.fact.trim().to_string(),
                    importance: IMPORTANCE_HINT,
                });
            }
        }

        candidates
    }
}

/// Reads `[[hints]]` tables from a TOML file. Missing or malformed files yield
/// no hints.
pub fn load_hints(path: impl AsRef<Path>) -> Vec<KeywordHint> {
    #[derive(Deserialize)]
    struct HintFile {
        #[serde(default)]
        hints: Vec<KeywordHint>,
    }

    let path = path.as_ref();
    let Ok(content) = std::fs::read_to_string(path) else {
        debug!("KnowledgeBuilder: No hint file at {}", path.display());
        return Vec::new();
    };

    match toml::from_str::<HintFile>(&content) {
        Ok(file) => {
            info!("KnowledgeBuilder: Loaded {} keyword hints", file.hints.len());
            file.hints
        }
        Err(e) => {
            warn!("KnowledgeBuilder: Ignoring malformed hint file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

#[derive(Clone)]
pub struct KnowledgeBuilder {
    store: MemoryStore,
    extractor: Arc<dyn FactExtractor>,
    window: usize,
    top_k: usize,
}

impl KnowledgeBuilder {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            extractor: Arc::new(KeywordExtractor::default()),
            window: DEFAULT_REFRESH_WINDOW,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_extractor(mut self, extractor: impl FactExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Scans the latest interactions and stores new facts. Returns how many
    /// were added; failures are logged, never propagated.
    pub fn refresh_facts(&self) -> usize {
        let interactions = match self.store.get_recent_interactions(self.window) {
            Ok(interactions) => interactions,
            Err(e) => {
                warn!("KnowledgeBuilder: Could not read interaction window: {}", e);
                return 0;
            }
        };
        if interactions.is_empty() {
            debug!("KnowledgeBuilder: No interactions to scan");
            return 0;
        }

        let mut added = 0usize;
        for candidate in self.extractor.extract(&interactions) {
            if candidate.fact.trim().is_empty() {
                warn!("KnowledgeBuilder: Skipping empty candidate from {}", candidate.source);
                continue;
            }
            match self
                .store
                .add_fact(&candidate.source, &candidate.fact, candidate.importance)
            {
                Ok(()) => added += 1,
                Err(e) if e.is_duplicate() => {}
                Err(e) => warn!("KnowledgeBuilder: Failed to store fact: {}", e),
            }
        }

        info!("KnowledgeBuilder: {} new facts", added);
        added
    }

    /// Top-K facts by keyword overlap with `query`, then importance, then
    /// recency. Facts sharing no whole token with the query are left out even
    /// when a short query word occurs inside one of their words.
    pub fn get_relevant_facts(&self, query: &str) -> Vec<Fact> {
        let mut seen = HashSet::new();
        let tokens: Vec<String> = tokenize(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if tokens.is_empty() || self.top_k == 0 {
            return Vec::new();
        }

        let candidates = match self.store.search_facts(&tokens) {
            Ok(facts) => facts,
            Err(e) => {
                warn!("KnowledgeBuilder: Fact search failed: {}", e);
                return Vec::new();
            }
        };

        let mut scored: Vec<(usize, Fact)> = candidates
            .into_iter()
            .map(|fact| {
                let fact_tokens: HashSet<String> = tokenize(&fact.fact).into_iter().collect();
                let overlap = tokens.iter().filter(|t| fact_tokens.contains(*t)).count();
                (overlap, fact)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.importance.cmp(&a.1.importance))
                .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
        });
        scored.truncate(self.top_k);
        scored.into_iter().map(|(_, fact)| fact).collect()
    }
}

/// Whole-token match, allowing a plural `s` or `e` suffix.
fn mentions_keyword(token: &str, keyword: &str) -> bool {
    token
        .strip_prefix(keyword)
        .is_some_and(|rest| matches!(rest, "" | "s" | "e"))
}

/// Lowercased alphanumeric runs of at least two characters.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle = tokenize(phrase);
    if needle.is_empty() || needle.len() > words.len() {
        return false;
    }
    words.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Splits on line breaks and on `.`, `!`, `?` followed by whitespace. The
/// terminal punctuation stays with its sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn test_store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    fn cad_hint() -> KeywordHint {
        KeywordHint {
            keyword: "cad".to_string(),
            fact: "CAD-Fälle müssen vor 10 Uhr gemeldet werden.".to_string(),
        }
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Erster Satz. Zweiter Satz!\nDritter? v1.2 bleibt ganz");
        assert_eq!(
            sentences,
            vec!["Erster Satz.", "Zweiter Satz!", "Dritter?", "v1.2 bleibt ganz"]
        );
    }

    #[test]
    fn test_extractor_filters() {
        let extractor = KeywordExtractor::default();
        assert!(extractor.is_fact_sentence("Backups müssen täglich laufen."));
        assert!(extractor.is_fact_sentence("Case 5 needs recalibration"));
        assert!(!extractor.is_fact_sentence("Should we restart the server?"));
        assert!(!extractor.is_fact_sentence("Must do."));
        assert!(!extractor.is_fact_sentence("Right now the queue must wait."));
        assert!(!extractor.is_fact_sentence("The needle broke again today"));
        assert!(!extractor.is_fact_sentence("CAD case 5 failed"));
    }

    #[test]
    fn test_empty_store_refresh() {
        let store = test_store();
        let builder = KnowledgeBuilder::new(store.clone()).with_extractor(
            KeywordExtractor::default().with_hints(vec![cad_hint()]),
        );
        assert!(store.get_recent_interactions(30).unwrap().is_empty());
        assert_eq!(builder.refresh_facts(), 0);
        assert!(builder.get_relevant_facts("CAD case").is_empty());
    }

    #[test]
    fn test_cad_scenario() {
        let store = test_store();
        store.add_interaction(Role::User, "CAD case 5 failed", None).unwrap();
        store
            .add_interaction(Role::Assistant, "Case 5 needs recalibration", None)
            .unwrap();

        let builder = KnowledgeBuilder::new(store.clone()).with_extractor(
            KeywordExtractor::default().with_hints(vec![cad_hint()]),
        );
        assert_eq!(builder.refresh_facts(), 2);

        let facts = store.get_all_facts().unwrap();
        assert!(facts.iter().any(|f| f.fact.contains("recalibration")
            && f.source.starts_with("interaction:")));
        assert!(facts.iter().any(|f| f.source == "heuristic:cad"));

        let relevant = builder.get_relevant_facts("CAD case");
        assert_eq!(relevant.len(), 2);
        assert_eq!(relevant[0].fact, "Case 5 needs recalibration");
        assert_eq!(relevant[0].importance, IMPORTANCE_EXTRACTED);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let store = test_store();
        store
            .add_interaction(Role::User, "Reports must be sent on Fridays. Thanks!", None)
            .unwrap();
        store
            .add_interaction(Role::Assistant, "Noted. Reports must be sent on Fridays.", None)
            .unwrap();

        let builder = KnowledgeBuilder::new(store.clone());
        assert_eq!(builder.refresh_facts(), 1);
        let after_first = store.fact_count().unwrap();
        assert_eq!(builder.refresh_facts(), 0);
        assert_eq!(store.fact_count().unwrap(), after_first);
    }

    #[test]
    fn test_refresh_window_is_bounded() {
        let store = test_store();
        store
            .add_interaction(Role::User, "Old tickets must be archived monthly.", None)
            .unwrap();
        for i in 0..3 {
            store.add_interaction(Role::User, &format!("filler {}", i), None).unwrap();
        }

        let builder = KnowledgeBuilder::new(store.clone()).with_window(3);
        assert_eq!(builder.refresh_facts(), 0);
        assert_eq!(builder.with_window(10).refresh_facts(), 1);
    }

    #[test]
    fn test_relevant_facts_no_match() {
        let store = test_store();
        store.add_fact("a", "Backups must run daily", 2).unwrap();
        let builder = KnowledgeBuilder::new(store);
        assert!(builder.get_relevant_facts("printer toner").is_empty());
        assert!(builder.get_relevant_facts("?!").is_empty());
    }

    #[test]
    fn test_relevant_facts_need_whole_token_overlap() {
        let store = test_store();
        store.add_fact("d", "Dispatch handles escalations", 1).unwrap();
        let builder = KnowledgeBuilder::new(store);

        // "is" occurs inside "dispatch" but is not one of its tokens
        assert!(builder.get_relevant_facts("is the printer on").is_empty());
        assert_eq!(builder.get_relevant_facts("who handles this").len(), 1);
    }

    #[test]
    fn test_hint_keyword_matching() {
        let extractor = KeywordExtractor::default().with_hints(vec![
            cad_hint(),
            KeywordHint {
                keyword: "backup".to_string(),
                fact: "Regelmäßige Backups sind Pflicht.".to_string(),
            },
        ]);
        let store = test_store();
        store.add_interaction(Role::User, "The cadence of the cadastre sync", None).unwrap();
        store.add_interaction(Role::User, "Did the Backups finish", None).unwrap();

        let sources: Vec<_> = extractor
            .extract(&store.get_recent_interactions(10).unwrap())
            .into_iter()
            .map(|c| c.source)
            .collect();
        assert_eq!(sources, vec!["heuristic:backup"]);
        assert!(mentions_keyword("cads", "cad"));
        assert!(!mentions_keyword("cadence", "cad"));
    }

    #[test]
    fn test_relevant_facts_ranking_and_limit() {
        let store = test_store();
        store.add_fact("a", "Dispatch mails need deadlines", 1).unwrap();
        store.add_fact("b", "Dispatch mails to technicians need details", 1).unwrap();
        store.add_fact("c", "Dispatch is staffed on weekends", 3).unwrap();
        store.add_fact("d", "Dispatch handles escalations", 1).unwrap();

        let builder = KnowledgeBuilder::new(store).with_top_k(3);
        let relevant = builder.get_relevant_facts("dispatch mails");
        let sources: Vec<_> = relevant.iter().map(|f| f.source.as_str()).collect();
        // Two-token overlap first (newest first), then importance
        assert_eq!(sources, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_custom_extractor() {
        struct EverythingFromUser;
        impl FactExtractor for EverythingFromUser {
            fn extract(&self, interactions: &[Interaction]) -> Vec<CandidateFact> {
                interactions
                    .iter()
                    .filter(|i| i.role == Role::User)
                    .map(|i| CandidateFact {
                        source: "custom".to_string(),
                        fact: i.content.clone(),
                        importance: 7,
                    })
                    .collect()
            }
        }

        let store = test_store();
        store.add_interaction(Role::User, "I prefer short answers", None).unwrap();
        store.add_interaction(Role::Assistant, "Understood", None).unwrap();
        store.add_interaction(Role::User, "   ", None).unwrap();

        let builder = KnowledgeBuilder::new(store.clone()).with_extractor(EverythingFromUser);
        // Blank candidate is skipped, not fatal
        assert_eq!(builder.refresh_facts(), 1);
        assert_eq!(store.get_all_facts().unwrap()[0].importance, 7);
    }

    #[test]
    fn test_load_hints() {
        let dir = std::env::temp_dir().join(format!("ki-kumpel-hints-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("hints.toml");
        std::fs::write(
            &good,
            "[[hints]]\nkeyword = \"backup\"\nfact = \"Regelmäßige Backups sind Pflicht.\"\n",
        )
        .unwrap();
        let hints = load_hints(&good);
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].keyword, "backup");

        let bad = dir.join("bad.toml");
        std::fs::write(&bad, "[[hints]\nkeyword = ").unwrap();
        assert!(load_hints(&bad).is_empty());
        assert!(load_hints(dir.join("missing.toml")).is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }
}
