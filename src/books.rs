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

//! # books
//!
//! The in-memory book store: create/read/update/delete/list with auto-incrementing identifiers.
//!
//! The store is an explicit object with exclusive ownership of its records-- no class-level
//! singleton, no ambient global. Construct one at process start, hand it around in an [Arc],
//! and (in tests) call [`BookStore::reset`] between scenarios.
//!
//! All operations are synchronous & atomic with respect to one another: a single [Mutex] guards
//! the record map *and* the id counter, so there's no window in which a created book is visible
//! without its id, or two creates race for the same id.
//!
//! [Arc]: std::sync::Arc

use std::{collections::BTreeMap, sync::Mutex};

use chrono::Utc;
use snafu::prelude::*;

use crate::entities::{Book, BookId};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Book {id} not found"))]
    NotFound { id: BookId },
}

type Result<T> = std::result::Result<T, Error>;

/// Fields to apply in an update; `None` means "leave alone", `Some(None)` on the nullable fields
/// means "clear"
#[derive(Clone, Debug, Default)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_year: Option<Option<i64>>,
    pub isbn: Option<Option<String>>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<BookId, Book>,
    next_id: u64,
}

/// The in-memory book store
#[derive(Debug)]
pub struct BookStore {
    inner: Mutex<Inner>,
}

impl Default for BookStore {
    fn default() -> Self {
        BookStore::new()
    }
}

impl BookStore {
    pub fn new() -> BookStore {
        BookStore {
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
    /// Create a book; assigns the next sequential id & stamps `created_at` = `updated_at` = now
    pub fn create(
        &self,
        title: &str,
        author: &str,
        published_year: Option<i64>,
        isbn: Option<String>,
        created_by: Option<String>,
    ) -> Book {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let id = BookId::new(inner.next_id);
        inner.next_id += 1;
        let now = Utc::now();
        let book = Book {
            id,
            title: title.to_owned(),
            author: author.to_owned(),
            published_year,
            isbn,
            created_by,
            created_at: now,
            updated_at: now,
        };
        inner.records.insert(id, book.clone());
        book
    }
    pub fn get(&self, id: BookId) -> Result<Book> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .records
            .get(&id)
            .cloned()
            .context(NotFoundSnafu { id })
    }
    pub fn contains(&self, id: BookId) -> bool {
        self.inner
            .lock()
            .expect("lock poisoned")
            .records
            .contains_key(&id)
    }
    /// All books, ascending by id
    pub fn list(&self) -> Vec<Book> {
        // BTreeMap iteration order *is* id order
        self.inner
            .lock()
            .expect("lock poisoned")
            .records
            .values()
            .cloned()
            .collect()
    }
    /// Apply `patch` to the book with the given id; `id` and `created_at` are immutable,
    /// `updated_at` is refreshed
    pub fn update(&self, id: BookId, patch: BookPatch) -> Result<Book> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let book = inner.records.get_mut(&id).context(NotFoundSnafu { id })?;
        if let Some(title) = patch.title {
            book.title = title;
        }
        if let Some(author) = patch.author {
            book.author = author;
        }
        if let Some(published_year) = patch.published_year {
            book.published_year = published_year;
        }
        if let Some(isbn) = patch.isbn {
            book.isbn = isbn;
        }
        book.updated_at = Utc::now();
        Ok(book.clone())
    }
    /// Remove the book permanently-- no soft-delete, no tombstone. The id is *not* returned to
    /// the pool.
    pub fn delete(&self, id: BookId) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner
            .records
            .remove(&id)
            .map(|_| ())
            .context(NotFoundSnafu { id })
    }
    /// Reseed the store wholesale; the next id becomes one more than the largest seeded id
    pub fn replace_all(&self, books: impl IntoIterator<Item = Book>) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.records = books.into_iter().map(|b| (b.id, b)).collect();
        inner.next_id = inner
            .records
            .keys()
            .next_back()
            .map(|id| id.as_u64() + 1)
            .unwrap_or(1);
    }
    /// Test isolation hook: drop all records & restart the id sequence
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.records.clear();
        inner.next_id = 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let store = BookStore::new();
        let a = store.create("Libro 1", "Autora", None, None, None);
        let b = store.create("Libro 2", "Autor", None, None, None);
        assert_eq!(a.id.as_u64(), 1);
        assert_eq!(b.id.as_u64(), 2);
        store.delete(b.id).unwrap();
        let c = store.create("Libro 3", "Autor", None, None, None);
        assert_eq!(c.id.as_u64(), 3);
        // ...and across an interleaving of creates & deletes, each new id exceeds every
        // previously-issued one
        let mut max_seen = c.id;
        for i in 0..8 {
            let book = store.create(&format!("t{}", i), "a", None, None, None);
            assert!(book.id > max_seen);
            max_seen = book.id;
            if i % 2 == 0 {
                store.delete(book.id).unwrap();
            }
        }
    }

    #[test]
    fn update_preserves_id_and_created_at() {
        let store = BookStore::new();
        let book = store.create("Viejo", "Autor", Some(1990), None, None);
        let updated = store
            .update(
                book.id,
                BookPatch {
                    title: Some("Nuevo".to_owned()),
                    published_year: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.id, book.id);
        assert_eq!(updated.created_at, book.created_at);
        assert_eq!(updated.title, "Nuevo");
        assert_eq!(updated.author, "Autor");
        assert_eq!(updated.published_year, None);
        assert!(updated.updated_at >= updated.created_at);
    }

    #[test]
    fn missing_books() {
        let store = BookStore::new();
        assert!(matches!(
            store.get(BookId::new(999)),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.update(BookId::new(999), BookPatch::default()),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(BookId::new(999)),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn list_is_id_ascending() {
        let store = BookStore::new();
        for i in 0..4 {
            store.create(&format!("t{}", i), "a", None, None, None);
        }
        let ids: Vec<u64> = store.list().iter().map(|b| b.id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn replace_all_recomputes_next_id() {
        let store = BookStore::new();
        let a = store.create("uno", "a", None, None, None);
        let mut b = store.create("dos", "a", None, None, None);
        b.id = BookId::new(7);
        store.replace_all([a, b]);
        let next = store.create("tres", "a", None, None, None);
        assert_eq!(next.id.as_u64(), 8);
        store.reset();
        assert!(store.list().is_empty());
        assert_eq!(store.create("uno", "a", None, None, None).id.as_u64(), 1);
    }
}
