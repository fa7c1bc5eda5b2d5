//! # Exchange kinds and routing-key matching.
//!
//! Routing keys are `.`-separated words. Binding patterns on a topic exchange
//! accept two wildcards:
//! - `*` matches exactly one word;
//! - `#` matches zero or more words.
//!
//! ```text
//! pattern            key                       topic  direct
//! controller.*       controller.value          yes    no
//! controller.*       controller.value.extra    no     no
//! controller.#       controller.value.extra    yes    no
//! controller.#       controller                yes    no
//! controller.value   controller.value          yes    yes
//! ```
//!
//! Fanout exchanges ignore the pattern entirely.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How an exchange distributes messages over its bound queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Pattern match on `.`-separated routing keys (default).
    #[default]
    Topic,
    /// Every bound queue receives every message.
    Fanout,
    /// Routing key must equal the binding key.
    Direct,
}

impl ExchangeKind {
    /// Protocol name of the exchange type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topic" => Ok(ExchangeKind::Topic),
            "fanout" => Ok(ExchangeKind::Fanout),
            "direct" => Ok(ExchangeKind::Direct),
            other => Err(format!("unknown exchange type \"{other}\"")),
        }
    }
}

/// Returns true if a message published with `key` reaches a queue bound with `pattern`.
pub fn matches(kind: ExchangeKind, pattern: &str, key: &str) -> bool {
    match kind {
        ExchangeKind::Fanout => true,
        ExchangeKind::Direct => pattern == key,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = pattern.split('.').collect();
            let key: Vec<&str> = key.split('.').collect();
            topic_match(&pattern, &key)
        }
    }
}

fn topic_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| topic_match(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && topic_match(rest, tail),
            None => false,
        },
    }
}
