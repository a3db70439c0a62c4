//! Prompt building blocks: system prompt, background facts, date/time context
//! and transcript lines.

use chrono::{Local, Utc};

use crate::models::{format_timestamp, Interaction};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful desktop assistant for an IT and dispatch specialist. \
Answer briefly, clearly and concretely. Use the background knowledge when it is relevant.";

/// Format current date and time for inclusion in system prompts
///
/// ```text
/// Current date/time: Wednesday, February 05, 2025, 14:30:15 UTC (2025-02-05T14:30:15+00:00)
/// Local time: Wednesday, February 05, 2025, 15:30:15 +01:00 (2025-02-05T15:30:15+01:00)
/// ```
pub fn datetime_context() -> String {
    let utc_now = Utc::now();
    let local_now = Local::now();

    format!(
        "Current date/time: {}, {} UTC ({})\nLocal time: {}, {} ({})",
        utc_now.format("%A, %B %d, %Y"),
        utc_now.format("%H:%M:%S"),
        utc_now.to_rfc3339(),
        local_now.format("%A, %B %d, %Y"),
        local_now.format("%H:%M:%S %Z"),
        local_now.to_rfc3339()
    )
}

/// Bullet list of facts, or `None` if there is nothing to add.
pub fn facts_block<S: AsRef<str>>(facts: &[S]) -> Option<String> {
    let lines: Vec<String> = facts
        .iter()
        .map(|f| f.as_ref().trim())
        .filter(|f| !f.is_empty())
        .map(|f| format!("- {f}"))
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!("Relevant background knowledge:\n{}", lines.join("\n")))
}

/// `USER (2025-06-08T14:35:31.000000Z): content`
pub fn format_interaction(interaction: &Interaction) -> String {
    format!(
        "{} ({}): {}",
        interaction.role.as_str().to_uppercase(),
        format_timestamp(interaction.timestamp),
        interaction.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_context_format() {
        let context = datetime_context();
        assert!(context.contains("Current date/time:"));
        assert!(context.contains("UTC"));
        assert!(context.contains("Local time:"));
        assert!(context.contains("T")); // RFC3339 format includes 'T'
    }

    #[test]
    fn test_facts_block() {
        assert_eq!(
            facts_block(&["Backups are mandatory", "  ", "CAD cases before 10"]).unwrap(),
            "Relevant background knowledge:\n- Backups are mandatory\n- CAD cases before 10"
        );
        assert!(facts_block::<String>(&[]).is_none());
    }

    #[test]
    fn test_format_interaction() {
        let interaction = Interaction {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 8, 14, 35, 31).unwrap(),
            role: Role::Assistant,
            content: "Case 5 needs recalibration".to_string(),
            meta: None,
        };
        assert_eq!(
            format_interaction(&interaction),
            "ASSISTANT (2025-06-08T14:35:31.000000Z): Case 5 needs recalibration"
        );
    }
}
