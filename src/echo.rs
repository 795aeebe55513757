//! Transcript echo filter
//!
//! Remembers recently spoken text so the recognition side can drop
//! transcripts that merely repeat what the speaker just said. This is a
//! heuristic on top of the reverb gate, not a replacement for it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Maximum remembered utterances
const ECHO_MAX_ENTRIES: usize = 64;

/// Shortest normalized transcript considered for echo matching
const MIN_MATCH_CHARS: usize = 4;

/// Recently spoken text, keyed by normalized form
#[derive(Debug)]
pub struct EchoFilter {
    spoken: HashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl EchoFilter {
    /// Remember spoken text for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            spoken: HashMap::new(),
            ttl,
            max_entries: ECHO_MAX_ENTRIES,
        }
    }

    /// Record text that was just synthesized
    pub fn record(&mut self, text: &str) {
        let key = normalize(text);
        if key.is_empty() {
            return;
        }

        let now = Instant::now();

        // Evict expired entries periodically (when at capacity)
        if self.spoken.len() >= self.max_entries {
            self.spoken.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        // If still at capacity after eviction, remove oldest entry
        if self.spoken.len() >= self.max_entries {
            if let Some(oldest_key) = self
                .spoken
                .iter()
                .min_by_key(|(_, ts)| *ts)
                .map(|(k, _)| k.clone())
            {
                self.spoken.remove(&oldest_key);
            }
        }

        self.spoken.insert(key, now);
    }

    /// Whether `transcript` looks like recently spoken text
    ///
    /// Matches when the normalized transcript equals, or is contained in, a
    /// remembered utterance. Very short transcripts never match.
    #[must_use]
    pub fn is_echo(&self, transcript: &str) -> bool {
        let heard = normalize(transcript);
        if heard.len() < MIN_MATCH_CHARS {
            return false;
        }

        let now = Instant::now();
        self.spoken
            .iter()
            .filter(|(_, ts)| now.duration_since(**ts) < self.ttl)
            .any(|(spoken, _)| spoken.contains(&heard))
    }
}

/// Lowercase, drop punctuation, collapse whitespace
fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            let keep = c.is_alphanumeric();
            c.to_lowercase().map(move |l| if keep { l } else { ' ' })
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
