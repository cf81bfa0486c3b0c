//! Removes registered secrets from messages before they are printed or persisted.

use arc_swap::ArcSwap;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Replacement written in place of every registered secret.
pub const REDACTED: &str = "[redacted]";

/// Secrets shorter than this are ignored, as they would mangle unrelated text.
const MIN_SECRET_LEN: usize = 3;

/// A shared, cheaply cloneable set of secrets to strip from text.
///
/// Reads are lock-free: the compiled matcher is swapped atomically whenever a
/// secret is added, so log formatting never blocks on registration.
#[derive(Clone, Default)]
pub struct Redactor {
    state: Arc<ArcSwap<RedactorState>>,
}

#[derive(Default)]
struct RedactorState {
    secrets: BTreeSet<String>,
    matcher: Option<Regex>,
}

impl Redactor {
    /// Creates a redactor without any secrets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a secret. Blank or very short values are ignored.
    pub fn add(&self, secret: &str) {
        let secret = secret.trim();
        if secret.len() < MIN_SECRET_LEN {
            return;
        }

        self.state.rcu(|current| {
            let mut secrets = current.secrets.clone();
            secrets.insert(secret.to_owned());
            let matcher = compile(&secrets);
            RedactorState { secrets, matcher }
        });
    }

    /// Returns the number of registered secrets.
    pub fn len(&self) -> usize {
        self.state.load().secrets.len()
    }

    /// Determines if no secret is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces every occurrence of a registered secret with [`REDACTED`].
    pub fn filter<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match &self.state.load().matcher {
            Some(matcher) => match matcher.replace_all(text, REDACTED) {
                Cow::Borrowed(_) => Cow::Borrowed(text),
                Cow::Owned(filtered) => Cow::Owned(filtered),
            },
            None => Cow::Borrowed(text),
        }
    }
}

/// Builds one alternation, longest secrets first so that a secret containing
/// another one is replaced as a whole.
fn compile(secrets: &BTreeSet<String>) -> Option<Regex> {
    let mut ordered: Vec<&String> = secrets.iter().collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()));

    let pattern = ordered
        .into_iter()
        .map(|secret| regex::escape(secret))
        .collect::<Vec<_>>()
        .join("|");

    if pattern.is_empty() {
        None
    } else {
        match Regex::new(&pattern) {
            Ok(regex) => Some(regex),
            Err(err) => {
                tracing::error!("Failed to compile the redaction pattern: {:#}", err);
                None
            }
        }
    }
}
