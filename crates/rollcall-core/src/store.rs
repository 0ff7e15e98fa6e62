//! Enrolled gallery: reference embeddings keyed by roster identity.
//!
//! Built during enrollment, then only read while recognizing scenes. Keys are
//! held in a `BTreeMap` so every traversal is in sorted key order, which is
//! what makes matching independent of enrollment order.

use crate::types::{Embedding, InvalidEmbedding, RepresentativeMode};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct IdentityEntry {
    references: Vec<Embedding>,
    /// `None` when the references cancel out and have no usable mean.
    mean: Option<Embedding>,
}

impl IdentityEntry {
    fn new(first: Embedding) -> Self {
        Self {
            mean: Some(first.clone()),
            references: vec![first],
        }
    }

    fn push(&mut self, embedding: Embedding) {
        self.references.push(embedding);
        self.mean = Embedding::mean(&self.references).ok();
    }
}

/// What an identity is compared through, per [`RepresentativeMode`].
#[derive(Debug, Clone, Copy)]
pub enum Representative<'a> {
    References(&'a [Embedding]),
    Mean(&'a Embedding),
}

impl<'a> Representative<'a> {
    pub fn as_slice(&self) -> &'a [Embedding] {
        match *self {
            Representative::References(references) => references,
            Representative::Mean(mean) => std::slice::from_ref(mean),
        }
    }
}

/// Reference embeddings for every enrolled identity.
///
/// No identity ever maps to an empty collection, and all embeddings share the
/// dimension of the first one enrolled.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    entries: BTreeMap<String, IdentityEntry>,
    dimension: Option<usize>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, normalize and add a raw vector to `identity`'s references.
    ///
    /// A rejected vector leaves the store untouched.
    pub fn enroll(&mut self, identity: &str, values: &[f32]) -> Result<(), InvalidEmbedding> {
        let embedding = Embedding::from_slice(values)?;
        self.enroll_embedding(identity, embedding)
    }

    /// Add an already-validated embedding to `identity`'s references.
    pub fn enroll_embedding(
        &mut self,
        identity: &str,
        embedding: Embedding,
    ) -> Result<(), InvalidEmbedding> {
        if let Some(expected) = self.dimension {
            if embedding.dimension() != expected {
                return Err(InvalidEmbedding::DimensionMismatch {
                    expected,
                    got: embedding.dimension(),
                });
            }
        }
        self.dimension = Some(embedding.dimension());

        match self.entries.get_mut(identity) {
            Some(entry) => entry.push(embedding),
            None => {
                self.entries
                    .insert(identity.to_string(), IdentityEntry::new(embedding));
            }
        }

        tracing::trace!(
            identity,
            references = self.reference_count(identity),
            "embedding enrolled"
        );
        Ok(())
    }

    /// References or mean for `identity`, depending on `mode`.
    ///
    /// In mean mode an identity whose references have no usable mean falls
    /// back to its individual references.
    pub fn representative(
        &self,
        identity: &str,
        mode: RepresentativeMode,
    ) -> Option<Representative<'_>> {
        let entry = self.entries.get(identity)?;
        Some(match (mode, entry.mean.as_ref()) {
            (RepresentativeMode::Mean, Some(mean)) => Representative::Mean(mean),
            (RepresentativeMode::Mean, None) => {
                tracing::debug!(identity, "degenerate mean, comparing per reference");
                Representative::References(&entry.references)
            }
            (RepresentativeMode::PerReference, _) => Representative::References(&entry.references),
        })
    }

    /// Enrolled identities in sorted key order.
    pub fn all_identities(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Identities with their references, in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Embedding])> + '_ {
        self.entries
            .iter()
            .map(|(identity, entry)| (identity.as_str(), entry.references.as_slice()))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// Drop an identity and all its references. Returns whether it existed.
    pub fn remove(&mut self, identity: &str) -> bool {
        let removed = self.entries.remove(identity).is_some();
        if self.entries.is_empty() {
            self.dimension = None;
        }
        removed
    }

    /// Number of enrolled identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn reference_count(&self, identity: &str) -> usize {
        self.entries
            .get(identity)
            .map_or(0, |entry| entry.references.len())
    }

    pub fn total_references(&self) -> usize {
        self.entries.values().map(|entry| entry.references.len()).sum()
    }
}
