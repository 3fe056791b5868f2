// Copyright (C) 2026 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of biblioteca.
//
// biblioteca is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// biblioteca is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with biblioteca.  If not,
// see <http://www.gnu.org/licenses/>.

//! # storage
//!
//! Abstraction over the document store backing reviews & the activity log.
//!
//! The document store is an external collaborator as far as this crate is concerned: an opaque
//! thing with insert/find/count primitives over named collections of JSON documents. Application
//! code writes to the [Backend] trait; at startup a particular implementation is chosen. Right
//! now there's exactly one, [InMemory], which is all the service needs-- but keeping the seam
//! here means a real driver can slot in without touching the review service.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tap::Pipe;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entities::DocumentId;

/// Opaque error type; implementations wrap whatever their driver throws
#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// A stored document: a flat JSON map (the store adds an `_id` field on insert)
pub type Document = serde_json::Map<String, Value>;

/// An equality-on-fields filter; an empty filter matches every document
#[derive(Clone, Debug, Default)]
pub struct Filter(Document);

impl Filter {
    pub fn all() -> Filter {
        Filter::default()
    }
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Filter {
        self.0.insert(field.to_owned(), value.into());
        self
    }
    pub fn matches(&self, document: &Document) -> bool {
        self.0
            .iter()
            .all(|(field, want)| document.get(field) == Some(want))
    }
}

#[async_trait]
pub trait Backend {
    /// Insert `document` into `collection`, assigning it a fresh `_id`; returns that id
    async fn insert_one(&self, collection: &str, document: Document) -> Result<DocumentId>;
    /// All documents in `collection` matching `filter`, in insertion order
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;
    async fn count(&self, collection: &str, filter: &Filter) -> Result<usize>;
    /// Remove matching documents; returns how many went away
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize>;
    /// Round-trip to the store & describe it; the health endpoint surfaces this verbatim
    async fn server_info(&self) -> Result<Document>;
}

/// The in-memory document store
#[derive(Debug, Default)]
pub struct InMemory {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl InMemory {
    pub fn new() -> InMemory {
        InMemory::default()
    }
}

#[async_trait]
impl Backend for InMemory {
    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<DocumentId> {
        let id = DocumentId::new(Uuid::new_v4().as_simple().to_string());
        document.insert("_id".to_owned(), Value::String(id.to_string()));
        self.collections
            .write()
            .await
            .entry(collection.to_owned())
            .or_default()
            .push(document);
        Ok(id)
    }
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .pipe(Ok)
    }
    async fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|documents| documents.iter().filter(|doc| filter.matches(doc)).count())
            .unwrap_or(0)
            .pipe(Ok)
    }
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection) {
            Some(documents) => {
                let before = documents.len();
                documents.retain(|doc| !filter.matches(doc));
                Ok(before - documents.len())
            }
            None => Ok(0),
        }
    }
    async fn server_info(&self) -> Result<Document> {
        // No server to interrogate; report what we are. A real driver would return the
        // server's build info here.
        let mut info = Document::new();
        info.insert("backend".to_owned(), Value::String("in-memory".to_owned()));
        info.insert(
            "version".to_owned(),
            Value::String(env!("CARGO_PKG_VERSION").to_owned()),
        );
        Ok(info)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::json;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn insert_find_count_delete() {
        let store = InMemory::new();
        store
            .insert_one("book_reviews", doc(&[("book_id", json!(1)), ("rating", json!(5))]))
            .await
            .unwrap();
        store
            .insert_one("book_reviews", doc(&[("book_id", json!(2)), ("rating", json!(3))]))
            .await
            .unwrap();

        let hits = store
            .find("book_reviews", &Filter::all().eq("book_id", 1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("rating"), Some(&json!(5)));
        assert!(hits[0].contains_key("_id"));

        assert_eq!(store.count("book_reviews", &Filter::all()).await.unwrap(), 2);
        assert_eq!(store.count("nope", &Filter::all()).await.unwrap(), 0);

        let removed = store
            .delete_many("book_reviews", &Filter::all().eq("book_id", 2))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count("book_reviews", &Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn server_info_describes_the_store() {
        let info = InMemory::new().server_info().await.unwrap();
        assert_eq!(info.get("backend"), Some(&json!("in-memory")));
        assert!(info.contains_key("version"));
    }
}
