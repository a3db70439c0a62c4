//! Rewrites an answer's surface form to match the user's own writing:
//! salutation, sign-off and a direct tone, all derived from sample texts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

const SALUTATIONS: &[&str] = &["hallo", "hi", "hello", "hey", "guten", "liebe", "lieber", "dear"];

const SIGN_OFF_WORDS: &[&str] = &["grüße", "gruß", "thanks", "danke", "regards", "cheers"];

const MAX_SIGN_OFF_WORDS: usize = 4;

/// Hedging phrases and their direct replacements.
const HEDGES: &[(&str, &str)] = &[
    ("ich denke", "ich empfehle"),
    ("vielleicht", "bitte"),
    ("i think", "i recommend"),
    ("maybe", "please"),
    ("perhaps", "please"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Samples never hedge; hedges in answers get rewritten.
    Direct,
    /// Samples hedge themselves; wording is left alone.
    AsWritten,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleProfile {
    pub greeting: Option<String>,
    pub closing: Option<String>,
    pub tone: Tone,
    pub sample_count: usize,
}

impl StyleProfile {
    /// Returns `None` when no sample has any content.
    pub fn from_samples<S: AsRef<str>>(samples: &[S]) -> Option<Self> {
        let samples: Vec<Vec<&str>> = samples
            .iter()
            .map(|s| {
                s.as_ref()
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|lines| !lines.is_empty())
            .collect();
        if samples.is_empty() {
            return None;
        }

        let greetings = samples
            .iter()
            .filter_map(|lines| lines.first().copied())
            .filter(|line| is_salutation(line))
            .map(str::to_string)
            .collect();

        let closings = samples
            .iter()
            .filter(|lines| lines.len() >= 2)
            .map(|lines| lines[lines.len() - 2..].join("\n"))
            .filter(|closing| has_sign_off(closing))
            .collect();

        let hedges = samples
            .iter()
            .flatten()
            .any(|line| HEDGES.iter().any(|(from, _)| find_phrase(line, from).is_some()));

        Some(Self {
            greeting: most_frequent(greetings),
            closing: most_frequent(closings),
            tone: if hedges { Tone::AsWritten } else { Tone::Direct },
            sample_count: samples.len(),
        })
    }

    pub fn apply(&self, text: &str) -> String {
        let paragraphs = split_paragraphs(text.trim());

        let has_greeting = paragraphs
            .first()
            .and_then(|p| p.lines().next())
            .is_some_and(is_salutation);
        // A closing never stands in for the whole body
        let body_start = usize::from(has_greeting);
        let has_closing = paragraphs.len() > body_start + 1
            && paragraphs.last().is_some_and(|p| is_sign_off_block(p));
        let last = paragraphs.len().saturating_sub(1);

        let body: Vec<String> = paragraphs
            .iter()
            .enumerate()
            .map(|(i, para)| {
                if (i == 0 && has_greeting) || (i == last && has_closing) {
                    return para.clone();
                }
                let mut para = match self.tone {
                    Tone::Direct => HEDGES
                        .iter()
                        .fold(para.clone(), |acc, (from, to)| replace_phrase(&acc, from, to)),
                    Tone::AsWritten => para.clone(),
                };
                if !para.ends_with(['.', '!', '?', ':']) {
                    para.push('.');
                }
                para
            })
            .collect();

        let mut parts = Vec::new();
        if !has_greeting {
            parts.extend(self.greeting.clone());
        }
        if !body.is_empty() {
            parts.push(body.join("\n\n"));
        }
        if !has_closing {
            parts.extend(self.closing.clone());
        }
        parts.join("\n\n")
    }
}

/// Pure: the same text and samples always give the same result. Without usable
/// samples the text is returned unchanged.
pub fn apply_style<S: AsRef<str>>(text: &str, style_samples: &[S]) -> String {
    match StyleProfile::from_samples(style_samples) {
        Some(profile) => profile.apply(text),
        None => text.to_string(),
    }
}

/// Reads every `*.txt` file in `dir`, sorted by name.
pub fn load_samples(dir: impl AsRef<Path>) -> Vec<String> {
    let dir = dir.as_ref();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Style: No sample directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    paths.sort();

    let mut samples = Vec::new();
    for path in paths {
        match std::fs::read_to_string(&path) {
            Ok(sample) => samples.push(sample),
            Err(e) => error!("Style: Could not read sample {}: {}", path.display(), e),
        }
    }
    info!("Style: Loaded {} samples", samples.len());
    samples
}

fn is_salutation(line: &str) -> bool {
    line.split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .is_some_and(|w| SALUTATIONS.contains(&w.to_lowercase().as_str()))
}

fn has_sign_off(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|w| SIGN_OFF_WORDS.contains(&w.to_lowercase().as_str()))
}

/// Short block such as "Viele Grüße\nEren": at most two lines, the first a
/// few words long and holding a sign-off word.
fn is_sign_off_block(paragraph: &str) -> bool {
    let lines: Vec<&str> = paragraph.lines().collect();
    match lines.first() {
        Some(first) if lines.len() <= 2 => {
            first.split_whitespace().count() <= MAX_SIGN_OFF_WORDS && has_sign_off(first)
        }
        _ => false,
    }
}

/// Most common entry; ties go to whichever appeared first.
fn most_frequent(items: Vec<String>) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        counts.entry(item.as_str()).or_insert((0, idx)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.1 .1.cmp(&a.1 .1)))
        .map(|(item, _)| item.to_string())
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

/// Char index of the first whole-word, case-insensitive match of `phrase`.
fn find_phrase(text: &str, phrase: &str) -> Option<usize> {
    let chars: Vec<char> = text.chars().collect();
    find_phrase_from(&chars, &lowercase_chars(phrase), 0)
}

fn find_phrase_from(chars: &[char], needle: &[char], start: usize) -> Option<usize> {
    if needle.is_empty() || needle.len() > chars.len() {
        return None;
    }
    (start..=chars.len() - needle.len()).find(|&i| {
        let before_ok = i == 0 || !chars[i - 1].is_alphanumeric();
        let end = i + needle.len();
        let after_ok = end == chars.len() || !chars[end].is_alphanumeric();
        before_ok
            && after_ok
            && chars[i..end]
                .iter()
                .zip(needle)
                .all(|(c, n)| lower_char(*c) == *n)
    })
}

fn replace_phrase(text: &str, from: &str, to: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let needle = lowercase_chars(from);
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    while let Some(hit) = find_phrase_from(&chars, &needle, pos) {
        out.extend(&chars[pos..hit]);
        if chars[hit].is_uppercase() {
            let mut rest = to.chars();
            if let Some(first) = rest.next() {
                out.extend(first.to_uppercase());
                out.extend(rest);
            }
        } else {
            out.push_str(to);
        }
        pos = hit + needle.len();
    }
    out.extend(&chars[pos..]);
    out
}

fn lower_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn lowercase_chars(text: &str) -> Vec<char> {
    text.chars().map(lower_char).collect()
}
