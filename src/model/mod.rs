//! Text model
//!
//! The model is whatever the [`TextModeler`] produces from the archive's
//! training corpus. The manager only cares that it serializes; the default
//! [`MarkovModeler`] is a small word-chain generator.

pub mod manager;
pub mod markov;

pub use manager::{ModelEnvelope, ModelManager, ModelSlot, ModelState};
pub use markov::MarkovModeler;

use serde::{Deserialize, Serialize};

/// Trained model: an interned vocabulary plus tokenized lines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Vocabulary, indexed by the token ids below
    pub tokens: Vec<String>,
    /// Lines that don't address anyone
    pub sentences: Vec<Vec<usize>>,
    /// Lines containing @mentions, used for replies
    pub mentions: Vec<Vec<usize>>,
    /// Most significant words, most frequent first
    pub keywords: Vec<String>,
}

impl Model {
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty() && self.mentions.is_empty()
    }

    /// Top `n` keywords
    pub fn top_keywords(&self, n: usize) -> &[String] {
        &self.keywords[..n.min(self.keywords.len())]
    }
}

/// Text generation collaborator
pub trait TextModeler: Send + Sync {
    fn train(&self, corpus: &[String]) -> Model;

    /// A standalone statement of at most `max_len` characters
    fn generate(&self, model: &Model, max_len: usize) -> String;

    /// A statement related to `prompt`, at most `max_len` characters
    fn respond(&self, model: &Model, prompt: &str, max_len: usize) -> String;
}
