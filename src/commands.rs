//! Owner direct-message commands
//!
//! The source account can drive the bot by DM. The first word picks the
//! action and the rest is its payload:
//!
//! | command | effect |
//! |---|---|
//! | `tweet <prompt>` | post a response to the prompt |
//! | `follow <handles>` | follow the listed accounts |
//! | `unfollow <handles>` | unfollow the listed accounts |
//! | `block <handles>` | block the listed accounts |
//! | `mention <prefix>` | post the prefix followed by a statement |
//! | `cheating <text>` | post the text verbatim |
//!
//! Handle lists may be separated by commas, semicolons or spaces; `@` is
//! optional.

use once_cell::sync::Lazy;
use regex::Regex;

static HANDLE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,;]+").unwrap());

/// Relationship actions that take a list of handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Follow,
    Unfollow,
    Block,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Unfollow => "unfollow",
            Self::Block => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tweet { prompt: String },
    Relate { relation: Relation, handles: Vec<String> },
    Mention { prefix: String },
    Cheating { text: String },
    /// Unknown action; the bot answers it like any other message
    Other { action: String },
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (action, payload) = match text.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (text, ""),
        };
        let action = action.to_lowercase();

        match action.as_str() {
            "tweet" => Self::Tweet {
                prompt: payload.to_string(),
            },
            "follow" => Self::relate(Relation::Follow, payload),
            "unfollow" => Self::relate(Relation::Unfollow, payload),
            "block" => Self::relate(Relation::Block, payload),
            "mention" => Self::Mention {
                prefix: payload.to_string(),
            },
            "cheating" => Self::Cheating {
                text: payload.to_string(),
            },
            _ => Self::Other { action },
        }
    }

    fn relate(relation: Relation, payload: &str) -> Self {
        Self::Relate {
            relation,
            handles: parse_handles(payload),
        }
    }
}

/// Split a handle list, dropping `@` and empty entries
pub fn parse_handles(payload: &str) -> Vec<String> {
    HANDLE_SEPARATOR
        .split(&payload.replace('@', ""))
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}
