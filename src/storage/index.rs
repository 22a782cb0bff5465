//! In-memory LSH band index.
//!
//! Maps each signature band key to the documents whose signature produced
//! it. Candidate search touches only the buckets of the query's band keys, so
//! cost grows with bucket sizes, not with archive size.
//!
//! The index is derived state: the store rebuilds it from persisted
//! signatures at open and feeds it only committed writes.

use crate::models::{DocumentId, SimilaritySignature};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Band key to document id mapping.
#[derive(Debug)]
pub struct SignatureIndex {
    bands: usize,
    buckets: RwLock<HashMap<u64, Vec<DocumentId>>>,
}

impl SignatureIndex {
    /// Creates an empty index cutting signatures into `bands` bands.
    #[must_use]
    pub fn new(bands: usize) -> Self {
        Self {
            bands,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Number of bands per signature.
    #[must_use]
    pub const fn bands(&self) -> usize {
        self.bands
    }

    /// Band keys of `signature` under this index's banding.
    #[must_use]
    pub fn keys_for(&self, signature: &SimilaritySignature) -> Vec<u64> {
        signature.band_keys(self.bands)
    }

    /// Adds a document under precomputed band keys.
    pub fn insert_keys(&self, id: DocumentId, keys: &[u64]) {
        let mut buckets = self
            .buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            let bucket = buckets.entry(*key).or_default();
            if let Err(pos) = bucket.binary_search(&id) {
                bucket.insert(pos, id);
            }
        }
    }

    /// Adds a document.
    pub fn insert(&self, id: DocumentId, signature: &SimilaritySignature) {
        self.insert_keys(id, &self.keys_for(signature));
    }

    /// Replaces the whole index.
    pub fn replace_all<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (DocumentId, SimilaritySignature)>,
    {
        let mut rebuilt: HashMap<u64, Vec<DocumentId>> = HashMap::new();
        let mut count = 0;
        for (id, signature) in entries {
            for key in self.keys_for(&signature) {
                rebuilt.entry(key).or_default().push(id);
            }
            count += 1;
        }
        for ids in rebuilt.values_mut() {
            ids.sort_unstable();
            ids.dedup();
        }

        *self
            .buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner) = rebuilt;
        count
    }

    /// Documents sharing at least one band with `signature`.
    ///
    /// Sorted by shared band count (descending) then id (ascending) and
    /// truncated to `limit`.
    #[must_use]
    pub fn candidates(&self, signature: &SimilaritySignature, limit: usize) -> Vec<DocumentId> {
        let keys = self.keys_for(signature);
        if keys.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut shared: HashMap<DocumentId, usize> = HashMap::new();
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            for key in &keys {
                if let Some(ids) = buckets.get(key) {
                    for id in ids {
                        *shared.entry(*id).or_default() += 1;
                    }
                }
            }
        }

        let mut ranked: Vec<(DocumentId, usize)> = shared.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked.into_iter().map(|(id, _)| id).collect()
    }

    /// Number of non-empty buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(values: &[u64]) -> SimilaritySignature {
        SimilaritySignature::new(values.to_vec())
    }

    #[test]
    fn test_candidates_ranked_by_shared_bands() {
        let index = SignatureIndex::new(4);
        index.insert(DocumentId::new(1), &sig(&[1, 2, 3, 4, 5, 6, 7, 8]));
        index.insert(DocumentId::new(2), &sig(&[1, 2, 3, 4, 0, 0, 0, 0]));
        index.insert(DocumentId::new(3), &sig(&[9, 9, 9, 9, 9, 9, 9, 9]));

        let found = index.candidates(&sig(&[1, 2, 3, 4, 5, 6, 0, 0]), 10);
        assert_eq!(found, vec![DocumentId::new(1), DocumentId::new(2)]);
    }

    #[test]
    fn test_candidates_tie_broken_by_id_and_limited() {
        let index = SignatureIndex::new(2);
        index.insert(DocumentId::new(7), &sig(&[1, 1, 5, 5]));
        index.insert(DocumentId::new(3), &sig(&[1, 1, 6, 6]));
        let found = index.candidates(&sig(&[1, 1, 0, 0]), 1);
        assert_eq!(found, vec![DocumentId::new(3)]);
    }

    #[test]
    fn test_empty_signature_has_no_candidates() {
        let index = SignatureIndex::new(2);
        index.insert(DocumentId::new(1), &SimilaritySignature::empty());
        assert_eq!(index.bucket_count(), 0);
        assert!(index.candidates(&SimilaritySignature::empty(), 5).is_empty());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let index = SignatureIndex::new(2);
        let s = sig(&[1, 2, 3, 4]);
        index.insert(DocumentId::new(1), &s);
        index.insert(DocumentId::new(1), &s);
        assert_eq!(index.candidates(&s, 10), vec![DocumentId::new(1)]);
    }

    #[test]
    fn test_replace_all() {
        let index = SignatureIndex::new(2);
        index.insert(DocumentId::new(1), &sig(&[1, 2, 3, 4]));
        let count = index.replace_all(vec![(DocumentId::new(5), sig(&[7, 7, 8, 8]))]);
        assert_eq!(count, 1);
        assert!(index.candidates(&sig(&[1, 2, 3, 4]), 10).is_empty());
        assert_eq!(
            index.candidates(&sig(&[7, 7, 0, 0]), 10),
            vec![DocumentId::new(5)]
        );
    }
}
