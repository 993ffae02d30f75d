//! Markov modeler
//!
//! First-order word chain over the training lines. Generation walks from a
//! random line start, picking each successor uniformly among observed
//! continuations, and stops at a line end or the length limit.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};

use super::{Model, TextModeler};

/// Words too common to be keywords
const STOPWORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "have", "from", "they", "what", "your", "just", "about",
    "there", "their", "would", "will", "been", "were", "when", "than", "then", "them", "like",
    "into", "some", "more", "only", "also", "because", "it's", "i'm", "don't",
];

const MAX_KEYWORDS: usize = 200;
const MAX_WORDS: usize = 60;
const ATTEMPTS: usize = 10;

/// Sentinel successor marking a line end
const END: usize = usize::MAX;

#[derive(Debug, Clone, Default)]
pub struct MarkovModeler;

impl MarkovModeler {
    pub fn new() -> Self {
        Self
    }

    fn chain(lines: &[Vec<usize>]) -> HashMap<usize, Vec<usize>> {
        let mut chain: HashMap<usize, Vec<usize>> = HashMap::new();
        for line in lines {
            for pair in line.windows(2) {
                chain.entry(pair[0]).or_default().push(pair[1]);
            }
            if let Some(&last) = line.last() {
                chain.entry(last).or_default().push(END);
            }
        }
        chain
    }

    /// Walk the chain from `start`, keeping the text within `max_len`
    fn walk(
        model: &Model,
        chain: &HashMap<usize, Vec<usize>>,
        start: usize,
        max_len: usize,
    ) -> String {
        let mut rng = rand::thread_rng();
        let Some(first) = model.tokens.get(start) else {
            return String::new();
        };
        let mut text = first.clone();
        if text.chars().count() > max_len {
            return String::new();
        }

        let mut current = start;
        for _ in 0..MAX_WORDS {
            let Some(&next) = chain.get(&current).and_then(|next| next.choose(&mut rng)) else {
                break;
            };
            if next == END {
                break;
            }

            let Some(word) = model.tokens.get(next) else {
                break;
            };
            if text.chars().count() + 1 + word.chars().count() > max_len {
                break;
            }
            text.push(' ');
            text.push_str(word);
            current = next;
        }
        text
    }

    /// Pick one of several walks, preferring the longest
    fn best_walk(model: &Model, lines: &[Vec<usize>], starts: &[usize], max_len: usize) -> String {
        if starts.is_empty() {
            return String::new();
        }
        let chain = Self::chain(lines);
        let mut rng = rand::thread_rng();

        (0..ATTEMPTS)
            .filter_map(|_| starts.choose(&mut rng))
            .map(|&start| Self::walk(model, &chain, start, max_len))
            .max_by_key(|text| text.chars().count())
            .unwrap_or_default()
    }
}

fn is_keyword_candidate(word: &str) -> bool {
    word.chars().count() > 3
        && word.chars().all(|c| c.is_alphanumeric() || c == '\'')
        && !STOPWORDS.contains(&word)
}

impl TextModeler for MarkovModeler {
    fn train(&self, corpus: &[String]) -> Model {
        let mut model = Model::default();
        let mut ids: HashMap<String, usize> = HashMap::new();
        let mut frequency: HashMap<String, usize> = HashMap::new();

        for line in corpus {
            let tokens: Vec<usize> = line
                .split_whitespace()
                .map(|word| {
                    *ids.entry(word.to_string()).or_insert_with(|| {
                        model.tokens.push(word.to_string());
                        model.tokens.len() - 1
                    })
                })
                .collect();
            if tokens.is_empty() {
                continue;
            }

            for word in line.split_whitespace() {
                let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
                if is_keyword_candidate(&word) {
                    *frequency.entry(word).or_default() += 1;
                }
            }

            if line.contains('@') {
                model.mentions.push(tokens);
            } else {
                model.sentences.push(tokens);
            }
        }

        let mut keywords: Vec<(String, usize)> = frequency.into_iter().collect();
        keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        model.keywords = keywords
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(word, _)| word)
            .collect();

        model
    }

    fn generate(&self, model: &Model, max_len: usize) -> String {
        let lines = if model.sentences.is_empty() {
            &model.mentions
        } else {
            &model.sentences
        };
        let starts: Vec<usize> = lines.iter().filter_map(|line| line.first().copied()).collect();
        Self::best_walk(model, lines, &starts, max_len)
    }

    fn respond(&self, model: &Model, prompt: &str, max_len: usize) -> String {
        let wanted: HashSet<String> = prompt
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| is_keyword_candidate(w))
            .collect();

        let mut lines: Vec<Vec<usize>> = model.sentences.clone();
        lines.extend(model.mentions.iter().cloned());

        let starts: Vec<usize> = lines
            .iter()
            .flatten()
            .copied()
            .filter(|&id| {
                model.tokens.get(id).is_some_and(|token| {
                    let word = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
                    wanted.contains(&word)
                })
            })
            .collect();

        if starts.is_empty() {
            return self.generate(model, max_len);
        }

        let text = Self::best_walk(model, &lines, &starts, max_len);
        // Short related walks sometimes give way to a plain statement
        if text.split_whitespace().count() < 3 && rand::thread_rng().gen_bool(0.5) {
            let statement = self.generate(model, max_len);
            if statement.chars().count() > text.chars().count() {
                return statement;
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "zebras run across the savanna".to_string(),
            "zebras sleep standing up".to_string(),
            "@friend zebras are great".to_string(),
            "the savanna is warm tonight".to_string(),
        ]
    }

    #[test]
    fn test_train_splits_mentions() {
        let model = MarkovModeler::new().train(&corpus());
        assert_eq!(model.sentences.len(), 3);
        assert_eq!(model.mentions.len(), 1);
        assert_eq!(model.keywords[0], "zebras");
        assert!(model.keywords.contains(&"savanna".to_string()));
        assert!(!model.keywords.contains(&"the".to_string()));
    }

    #[test]
    fn test_generate_uses_corpus_words_within_limit() {
        let modeler = MarkovModeler::new();
        let model = modeler.train(&corpus());
        let vocabulary: HashSet<&str> = model.tokens.iter().map(String::as_str).collect();

        for _ in 0..20 {
            let text = modeler.generate(&model, 25);
            assert!(!text.is_empty());
            assert!(text.chars().count() <= 25);
            assert!(text.split(' ').all(|w| vocabulary.contains(w)));
        }
    }

    #[test]
    fn test_empty_model_generates_nothing() {
        let modeler = MarkovModeler::new();
        let model = modeler.train(&[]);
        assert!(model.is_empty());
        assert_eq!(modeler.generate(&model, 280), "");
        assert_eq!(modeler.respond(&model, "hello zebras", 280), "");
    }

    #[test]
    fn test_out_of_range_token_ids_are_skipped() {
        let modeler = MarkovModeler::new();
        let model = Model {
            tokens: vec!["zebras".to_string(), "run".to_string()],
            sentences: vec![vec![0, 7], vec![9, 1]],
            ..Default::default()
        };

        for _ in 0..20 {
            let text = modeler.generate(&model, 280);
            assert!(text.is_empty() || text == "zebras" || text == "run");
            let _ = modeler.respond(&model, "zebras", 280);
        }
    }

    #[test]
    fn test_respond_without_overlap_falls_back() {
        let modeler = MarkovModeler::new();
        let model = modeler.train(&corpus());
        let text = modeler.respond(&model, "quantum chromodynamics", 280);
        assert!(!text.is_empty());
    }
}
