//! Evidence: verbatim quotes grouped by source document

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Quotes supporting a code, keyed by source document id.
///
/// Within one document quotes keep insertion order and never repeat (exact
/// string match).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidence(BTreeMap<String, Vec<String>>);

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build evidence for a single document.
    pub fn from_quotes<I, Q>(document: impl Into<String>, quotes: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        let mut evidence = Self::new();
        let document = document.into();
        for quote in quotes {
            evidence.insert(document.clone(), quote);
        }
        evidence
    }

    /// Append a quote unless the document already holds it.
    ///
    /// Returns whether the quote was added.
    pub fn insert(&mut self, document: impl Into<String>, quote: impl Into<String>) -> bool {
        let quote = quote.into();
        let quotes = self.0.entry(document.into()).or_default();
        if quotes.contains(&quote) {
            return false;
        }
        quotes.push(quote);
        true
    }

    /// Merge `other` into `self` and return what was actually added.
    ///
    /// For each document, quotes from `other` are appended in their order
    /// unless already present; duplicates later in `other` are rejected too.
    /// Existing quotes keep their order.
    pub fn merge(&mut self, other: &Evidence) -> Evidence {
        let mut added = Evidence::new();
        for (document, incoming) in &other.0 {
            if incoming.is_empty() {
                continue;
            }
            let quotes = self.0.entry(document.clone()).or_default();
            let fresh: Vec<String> = {
                let mut seen: HashSet<&str> = quotes.iter().map(String::as_str).collect();
                incoming
                    .iter()
                    .filter(|quote| seen.insert(quote.as_str()))
                    .cloned()
                    .collect()
            };
            if fresh.is_empty() {
                continue;
            }
            quotes.extend(fresh.iter().cloned());
            added.0.insert(document.clone(), fresh);
        }
        added
    }

    /// Copy of this evidence with repeated quotes and empty documents removed.
    pub fn deduplicated(&self) -> Evidence {
        let mut clean = Evidence::new();
        clean.merge(self);
        clean
    }

    /// Quotes recorded for one document.
    pub fn quotes(&self, document: &str) -> &[String] {
        self.0.get(document).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, document: &str, quote: &str) -> bool {
        self.quotes(document).iter().any(|q| q == quote)
    }

    /// Whether every quote in `other` is also present here.
    pub fn is_superset_of(&self, other: &Evidence) -> bool {
        other
            .iter()
            .all(|(document, quotes)| quotes.iter().all(|q| self.contains(document, q)))
    }

    /// Iterate over `(document, quotes)` pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(d, q)| (d.as_str(), q.as_slice()))
    }

    pub fn documents(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|(_, q)| !q.is_empty()).map(|(d, _)| d.as_str())
    }

    /// Number of documents with at least one quote.
    pub fn document_count(&self) -> usize {
        self.documents().count()
    }

    pub fn quote_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// True when no document holds any quote.
    pub fn is_empty(&self) -> bool {
        self.quote_count() == 0
    }
}

impl From<BTreeMap<String, Vec<String>>> for Evidence {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Evidence(map).deduplicated()
    }
}

impl<D, Q> FromIterator<(D, Q)> for Evidence
where
    D: Into<String>,
    Q: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (D, Q)>>(iter: T) -> Self {
        let mut evidence = Evidence::new();
        for (document, quote) in iter {
            evidence.insert(document, quote);
        }
        evidence
    }
}
