//! BM25 keyword index over leaf chunks.
//!
//! Summary nodes are synthetic text and never participate in lexical scoring.

use std::collections::HashMap;

const K1: f32 = 1.5;
const B: f32 = 0.75;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at", "by", "from",
    "for", "with", "in", "on", "to", "is", "am", "are", "was", "were", "be", "been", "being",
    "have", "has", "had", "do", "does", "did", "so", "up", "down", "out", "off", "over",
    "under", "again", "further", "once", "here", "there", "all", "any", "both", "each", "few",
    "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "than",
    "too", "very", "can", "will", "just", "should", "now",
];

/// Lowercase, strip punctuation, drop stop words and single chars.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Okapi BM25 over a fixed document corpus.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    /// Per-document term frequencies.
    doc_terms: Vec<HashMap<String, u32>>,
    doc_lens: Vec<f32>,
    avg_doc_len: f32,
    /// Document frequency per term.
    term_docs: HashMap<String, u32>,
}

impl Bm25Index {
    /// Build the index from document texts; document position is the score index.
    #[must_use]
    pub fn build(texts: &[&str]) -> Self {
        let mut doc_terms = Vec::with_capacity(texts.len());
        let mut doc_lens = Vec::with_capacity(texts.len());
        let mut term_docs: HashMap<String, u32> = HashMap::new();

        for text in texts {
            let tokens = tokenize(text);
            doc_lens.push(tokens.len() as f32);

            let mut terms: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *terms.entry(token).or_insert(0) += 1;
            }
            for term in terms.keys() {
                *term_docs.entry(term.clone()).or_insert(0) += 1;
            }
            doc_terms.push(terms);
        }

        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<f32>() / doc_lens.len() as f32
        };

        Self {
            doc_terms,
            doc_lens,
            avg_doc_len,
            term_docs,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_terms.is_empty()
    }

    /// BM25 scores for every document, in document order.
    #[must_use]
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let n = self.doc_terms.len();
        let mut scores = vec![0.0f32; n];
        if n == 0 || self.avg_doc_len == 0.0 {
            return scores;
        }

        for term in tokenize(query) {
            let Some(&df) = self.term_docs.get(&term) else {
                continue;
            };
            let idf = (((n as f32 - df as f32 + 0.5) / (df as f32 + 0.5)) + 1.0).ln();

            for (doc, terms) in self.doc_terms.iter().enumerate() {
                let Some(&tf) = terms.get(&term) else {
                    continue;
                };
                let tf = tf as f32;
                let norm = K1 * (1.0 - B + B * self.doc_lens[doc] / self.avg_doc_len);
                scores[doc] += idf * (tf * (K1 + 1.0)) / (tf + norm);
            }
        }

        scores
    }

    /// Top documents with positive scores, best first, ties on lower position.
    #[must_use]
    pub fn top_scores(&self, query: &str, limit: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_stop_words() {
        let tokens = tokenize("The quick, brown fox is over there!");
        assert_eq!(tokens, vec!["quick", "brown", "fox"]);
    }

    #[test]
    fn tokenize_drops_single_chars() {
        let tokens = tokenize("a b c dd");
        assert_eq!(tokens, vec!["dd"]);
    }

    #[test]
    fn matching_document_scores_highest() {
        let index = Bm25Index::build(&[
            "rust memory safety borrow checker",
            "python dynamic typing interpreter",
            "rust ownership lifetimes compiler",
        ]);

        let top = index.top_scores("rust borrow checker", 3);
        assert!(!top.is_empty());
        assert_eq!(top[0].0, 0);
    }

    #[test]
    fn unmatched_query_returns_empty() {
        let index = Bm25Index::build(&["alpha beta", "gamma delta"]);
        assert!(index.top_scores("zeppelin", 5).is_empty());
    }

    #[test]
    fn rare_terms_outweigh_common_terms() {
        let index = Bm25Index::build(&[
            "shared word unique",
            "shared word common",
            "shared word common",
        ]);
        let top = index.top_scores("unique", 3);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, 0);
    }

    #[test]
    fn empty_corpus_scores_nothing() {
        let index = Bm25Index::build(&[]);
        assert!(index.is_empty());
        assert!(index.scores("anything").is_empty());
    }

    #[test]
    fn limit_caps_results() {
        let index = Bm25Index::build(&["word here", "word there", "word everywhere"]);
        assert_eq!(index.top_scores("word", 2).len(), 2);
    }
}
