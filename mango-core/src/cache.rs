//! Immutable collection snapshots.
//!
//! A [`MangoCache`] is the frozen collection a finder reads. A [`RepoCache`]
//! pairs that collection with its [`RepoRoot`], the identity index a
//! repository writes through. Caches are never mutated: every write builds a
//! new one and publishes it in place of the old, so clones held elsewhere
//! keep seeing the snapshot they were taken from.

use std::{collections::HashMap, sync::Arc};

use bson::{Bson, Document};

use crate::{
    document::Uid,
    error::{MangoError, MangoResult},
};

/// Insertion-ordered identity → entity map.
///
/// Re-inserting an identity replaces the entity but keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoRoot {
    entries: Vec<(Uid, Document)>,
    positions: HashMap<Uid, usize>,
}

impl RepoRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, uid: &Uid) -> Option<&Document> {
        self.positions
            .get(uid)
            .map(|position| &self.entries[*position].1)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.positions.contains_key(uid)
    }

    /// Inserts or replaces an entity, returning the previous one.
    pub fn insert(&mut self, uid: Uid, entity: Document) -> Option<Document> {
        match self.positions.get(&uid) {
            Some(position) => Some(std::mem::replace(&mut self.entries[*position].1, entity)),
            None => {
                self.positions.insert(uid.clone(), self.entries.len());
                self.entries.push((uid, entity));
                None
            },
        }
    }

    pub fn remove(&mut self, uid: &Uid) -> Option<Document> {
        let position = self.positions.remove(uid)?;
        let (_, entity) = self.entries.remove(position);

        for (index, (uid, _)) in self.entries.iter().enumerate().skip(position) {
            self.positions.insert(uid.clone(), index);
        }

        Some(entity)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Uid> {
        self.entries.iter().map(|(uid, _)| uid)
    }

    pub fn values(&self) -> impl Iterator<Item = &Document> {
        self.entries.iter().map(|(_, entity)| entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uid, &Document)> {
        self.entries.iter().map(|(uid, entity)| (uid, entity))
    }

    pub fn into_values(self) -> impl Iterator<Item = Document> {
        self.entries.into_iter().map(|(_, entity)| entity)
    }

    /// The root as a document keyed by raw identity, for error context.
    pub fn to_document(&self) -> Document {
        self.iter()
            .map(|(uid, entity)| (uid.key(), Bson::Document(entity.clone())))
            .collect()
    }
}

impl FromIterator<(Uid, Document)> for RepoRoot {
    fn from_iter<I: IntoIterator<Item = (Uid, Document)>>(iter: I) -> Self {
        let mut root = RepoRoot::new();
        for (uid, entity) in iter {
            root.insert(uid, entity);
        }
        root
    }
}

/// The collection read by a finder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MangoCache {
    collection: Arc<[Document]>,
}

impl MangoCache {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        Self {
            collection: documents.into_iter().collect(),
        }
    }

    pub fn collection(&self) -> &[Document] {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    /// Whether both caches share the same snapshot.
    pub fn ptr_eq(&self, other: &MangoCache) -> bool {
        Arc::ptr_eq(&self.collection, &other.collection)
    }
}

/// A repository's collection and the identity index it is derived from.
///
/// `collection` always equals `root.values()`, element for element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoCache {
    collection: Arc<[Document]>,
    root: Arc<RepoRoot>,
}

impl RepoCache {
    /// Indexes `documents` by the value of `id_key`.
    ///
    /// A later document with an identity already seen replaces the earlier
    /// one in its original position.
    ///
    /// # Errors
    ///
    /// Returns an [`Internal`](crate::error::ErrorKind::Internal) error when a
    /// document has no identity or one that cannot be indexed. The error data
    /// carries the partial `root` and its `collection` at the time of failure.
    pub fn create(id_key: &str, documents: impl IntoIterator<Item = Document>) -> MangoResult<Self> {
        let mut root = RepoRoot::new();

        for document in documents {
            let uid = match Uid::of(&document, id_key) {
                Ok(Some(uid)) => uid,
                Ok(None) => return Err(Self::build_failure(
                    format!("Document is missing its {id_key}"),
                    &root,
                )),
                Err(err) => return Err(Self::build_failure(err.message().to_string(), &root)),
            };

            root.insert(uid, document);
        }

        Ok(Self::from_root(root))
    }

    fn build_failure(message: String, root: &RepoRoot) -> MangoError {
        MangoError::internal(message).with_data(bson::doc! {
            "collection": root.values().cloned().map(Bson::Document).collect::<Vec<_>>(),
            "root": root.to_document(),
        })
    }

    /// Derives the collection from an already indexed root.
    pub fn from_root(root: RepoRoot) -> Self {
        Self {
            collection: root.values().cloned().collect(),
            root: Arc::new(root),
        }
    }

    pub fn collection(&self) -> &[Document] {
        &self.collection
    }

    pub fn root(&self) -> &RepoRoot {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn get(&self, uid: &Uid) -> Option<&Document> {
        self.root.get(uid)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.root.contains(uid)
    }

    /// The finder view of this cache, sharing the same snapshot.
    pub fn into_finder_cache(self) -> MangoCache {
        MangoCache {
            collection: self.collection,
        }
    }

    pub fn ptr_eq(&self, other: &RepoCache) -> bool {
        Arc::ptr_eq(&self.collection, &other.collection) && Arc::ptr_eq(&self.root, &other.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use bson::doc;

    #[test]
    fn later_duplicates_overwrite_in_place() {
        let cache = RepoCache::create("id", vec![
            doc! { "id": "a", "n": 1 },
            doc! { "id": "b", "n": 2 },
            doc! { "id": "a", "n": 3 },
        ]).unwrap();

        assert_eq!(cache.collection(), &[doc! { "id": "a", "n": 3 }, doc! { "id": "b", "n": 2 }]);
        assert_eq!(cache.root().keys().cloned().collect::<Vec<_>>(), vec![Uid::from("a"), Uid::from("b")]);
    }

    #[test]
    fn missing_identity_abandons_the_build() {
        let err = RepoCache::create("id", vec![doc! { "id": 1 }, doc! { "name": "no id" }]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.data().get_document("root").unwrap(), &doc! { "1": { "id": 1 } });
        assert_eq!(err.data().get_array("collection").unwrap().len(), 1);
    }

    #[test]
    fn non_indexable_identity_abandons_the_build() {
        let err = RepoCache::create("id", vec![doc! { "id": { "nested": true } }]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn root_remove_keeps_order() {
        let mut root: RepoRoot = vec![
            (Uid::from("a"), doc! { "id": "a" }),
            (Uid::from("b"), doc! { "id": "b" }),
            (Uid::from("c"), doc! { "id": "c" }),
        ].into_iter().collect();

        assert!(root.remove(&Uid::from("a")).is_some());
        assert!(root.remove(&Uid::from("a")).is_none());
        assert_eq!(root.get(&Uid::from("c")), Some(&doc! { "id": "c" }));
        assert_eq!(root.values().cloned().collect::<Vec<_>>(), vec![doc! { "id": "b" }, doc! { "id": "c" }]);
    }

    #[test]
    fn finder_view_shares_the_snapshot() {
        let cache = RepoCache::create("id", vec![doc! { "id": 1 }]).unwrap();
        let finder = cache.clone().into_finder_cache();

        assert_eq!(finder.collection(), cache.collection());
        assert!(finder.ptr_eq(&cache.into_finder_cache()));
    }
}
