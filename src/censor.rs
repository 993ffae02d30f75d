//! Banned-term obfuscation
//!
//! Every post and reply goes through [`Censor::obscure`]. Banned terms are
//! matched case-insensitively on word boundaries and replaced with an
//! equal-length run of grawlix characters. Terms inside an @-handle are left
//! alone so replies still reach the right account.

use rand::seq::SliceRandom;
use regex::{Captures, Regex, RegexBuilder};
use tracing::warn;

const GRAWLIX: &[char] = &['!', '@', '$', '%', '^', '&', '*'];

/// Random grawlix string of `len` characters
pub fn grawlix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| *GRAWLIX.choose(&mut rng).unwrap_or(&'*'))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Censor {
    pattern: Option<Regex>,
}

impl Censor {
    pub fn new(terms: &[String]) -> Self {
        let alternatives: Vec<String> = terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Self::default();
        }

        let source = format!(r"\b(?:{})\b", alternatives.join("|"));
        match RegexBuilder::new(&source).case_insensitive(true).build() {
            Ok(pattern) => Self {
                pattern: Some(pattern),
            },
            Err(e) => {
                warn!("Ignoring banned terms, pattern failed to compile: {}", e);
                Self::default()
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.pattern.is_some()
    }

    /// Replace every banned term in `text`
    pub fn obscure(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        pattern
            .replace_all(text, |caps: &Captures| {
                let m = caps.get(0).map(|m| (m.start(), m.as_str())).unwrap_or((0, ""));
                if in_handle(text, m.0) {
                    m.1.to_string()
                } else {
                    grawlix(m.1.chars().count())
                }
            })
            .into_owned()
    }
}

/// Whether the word starting at `start` belongs to an @-handle
fn in_handle(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .rev()
        .take_while(|c| !c.is_whitespace())
        .last()
        .is_some_and(|c| c == '@')
}
