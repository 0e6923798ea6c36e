use std::cmp::Ordering;
use std::collections::HashMap;

use embedkit_core::{Bm25Config, IdfVariant};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Tokenize text into lowercase, diacritic-free words.
///
/// Lowercases, decomposes to NFD and drops combining marks (so `Café`
/// becomes `cafe`), then splits on every non-alphanumeric character.
/// Empty tokens are discarded; no other filtering is applied.
pub fn tokenize(text: &str) -> Vec<String> {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// A BM25 inverted index for keyword-based document retrieval.
///
/// Maintains an inverted index mapping terms to documents and their
/// term frequencies, along with document length statistics needed
/// for the BM25 scoring formula. The index is exact: removing or
/// re-adding a document retracts its previous contribution.
#[derive(Debug)]
pub struct Bm25Index {
    params: Bm25Config,
    /// term -> (doc_id -> term_frequency)
    inverted_index: HashMap<String, HashMap<Uuid, f32>>,
    /// doc_id -> document length (token count)
    doc_lengths: HashMap<Uuid, usize>,
    /// Average document length across all indexed documents.
    avg_doc_length: f32,
}

impl Bm25Index {
    /// Create a new, empty BM25 index with default parameters.
    pub fn new() -> Self {
        Self::with_params(Bm25Config::default())
    }

    /// Create a new, empty BM25 index with the given parameters.
    pub fn with_params(params: Bm25Config) -> Self {
        Self {
            params,
            inverted_index: HashMap::new(),
            doc_lengths: HashMap::new(),
            avg_doc_length: 0.0,
        }
    }

    /// Add a document to the index.
    ///
    /// Tokenizes the text, updates the inverted index with term frequencies,
    /// and recomputes average document length. Adding an id that is already
    /// indexed replaces its previous text.
    pub fn add_document(&mut self, id: Uuid, text: &str) {
        if self.doc_lengths.contains_key(&id) {
            self.retract(id);
        }

        let tokens = tokenize(text);
        let doc_len = tokens.len();

        let mut term_freq: HashMap<String, f32> = HashMap::new();
        for token in tokens {
            *term_freq.entry(token).or_insert(0.0) += 1.0;
        }

        // One posting per distinct term, so document frequency counts
        // documents rather than occurrences.
        for (term, freq) in term_freq {
            self.inverted_index
                .entry(term)
                .or_default()
                .insert(id, freq);
        }

        self.doc_lengths.insert(id, doc_len);
        self.recompute_avg_doc_length();
    }

    /// Remove a document from the index. Unknown ids are ignored.
    pub fn remove_document(&mut self, id: Uuid) {
        if self.retract(id) {
            self.recompute_avg_doc_length();
        }
    }

    /// Drop every document.
    pub fn clear(&mut self) {
        self.inverted_index.clear();
        self.doc_lengths.clear();
        self.avg_doc_length = 0.0;
    }

    /// Search the index for documents matching the query, returning up to
    /// `top_k` results sorted by descending BM25 score.
    ///
    /// Uses the standard BM25 scoring formula:
    /// ```text
    /// score = sum over query terms of:
    ///   IDF(t) * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * dl / avgdl))
    /// ```
    /// Documents scoring `<= 0` are discarded. Equal scores are ordered by
    /// ascending id. A query without tokens yields no results.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(Uuid, f32)> {
        let mut results: Vec<(Uuid, f32)> = self
            .score_all(query)
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        results.sort_by(|a, b| rank_order(*a, *b));
        results.truncate(top_k);
        results
    }

    /// Raw BM25 score of every document sharing at least one token with the
    /// query. Scores may be zero or negative under [`IdfVariant::Classic`].
    pub fn score_all(&self, query: &str) -> HashMap<Uuid, f32> {
        let mut scores: HashMap<Uuid, f32> = HashMap::new();
        if self.doc_lengths.is_empty() {
            return scores;
        }

        let n = self.doc_lengths.len() as f32;
        let avgdl = if self.avg_doc_length > 0.0 {
            self.avg_doc_length
        } else {
            1.0
        };
        let Bm25Config { k1, b, .. } = self.params;

        for token in tokenize(query) {
            let Some(postings) = self.inverted_index.get(&token) else {
                continue;
            };
            let idf = self.idf(n, postings.len() as f32);

            for (&doc_id, &tf) in postings {
                let dl = self.doc_lengths.get(&doc_id).copied().unwrap_or(0) as f32;
                let numerator = tf * (k1 + 1.0);
                let denominator = tf + k1 * (1.0 - b + b * dl / avgdl);
                *scores.entry(doc_id).or_insert(0.0) += idf * numerator / denominator;
            }
        }

        scores
    }

    /// Return the number of documents currently in the index.
    pub fn document_count(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Number of documents containing `term` at least once.
    pub fn document_frequency(&self, term: &str) -> usize {
        self.inverted_index.get(term).map_or(0, HashMap::len)
    }

    /// Token count of a document, if indexed.
    pub fn document_length(&self, id: Uuid) -> Option<usize> {
        self.doc_lengths.get(&id).copied()
    }

    /// Mean token count over all indexed documents; 0 when empty.
    pub fn average_document_length(&self) -> f32 {
        self.avg_doc_length
    }

    /// Whether `id` is indexed.
    pub fn contains(&self, id: Uuid) -> bool {
        self.doc_lengths.contains_key(&id)
    }

    fn idf(&self, n: f32, df: f32) -> f32 {
        let ratio = (n - df + 0.5) / (df + 0.5);
        match self.params.idf {
            IdfVariant::Classic => ratio.ln(),
            IdfVariant::Smoothed => (ratio + 1.0).ln(),
        }
    }

    /// Removes postings and length of `id`. Returns whether it was indexed.
    fn retract(&mut self, id: Uuid) -> bool {
        if self.doc_lengths.remove(&id).is_none() {
            return false;
        }
        self.inverted_index.retain(|_, postings| {
            postings.remove(&id);
            !postings.is_empty()
        });
        true
    }

    /// Recompute the average document length from current doc_lengths.
    fn recompute_avg_doc_length(&mut self) {
        if self.doc_lengths.is_empty() {
            self.avg_doc_length = 0.0;
        } else {
            let total: usize = self.doc_lengths.values().sum();
            self.avg_doc_length = total as f32 / self.doc_lengths.len() as f32;
        }
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

/// Orders two scored ids: score descending, then id ascending.
pub(crate) fn rank_order(a: (Uuid, f32), b: (Uuid, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
