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

//! # graph
//!
//! The recommendation graph: book nodes, user nodes & user→book rating edges, plus the ranking
//! query over them.
//!
//! Like the document store, the graph store is an external collaborator hidden behind a trait;
//! the in-memory implementation here holds the three mappings directly. All of the sync
//! operations are idempotent upserts-- re-syncing a (book, user) rating overwrites the prior
//! edge rather than duplicating it, which is what lets the resync job be a full re-derivation
//! (run it twice, get the same graph).

use std::collections::BTreeMap;

use async_trait::async_trait;
use itertools::Itertools;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::{
    entities::{Book, BookId, Rating, UserId},
    reviews::round2,
};

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

/// A book node as held in the graph (a projection of [Book], not the whole record)
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BookNode {
    pub id: BookId,
    pub title: String,
    pub author: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UserNode {
    pub id: UserId,
    pub username: String,
}

/// One entry in a user's recommendation list
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    pub average_rating: f64,
    pub num_reviews: usize,
}

/// A copy of the whole graph, for assertions & debugging
///
/// [BTreeMap]s so that iteration order is id order-- deterministic, and the thing the ranking
/// query's residual tie-break hangs off of.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    pub books: BTreeMap<BookId, BookNode>,
    pub users: BTreeMap<UserId, UserNode>,
    pub ratings: BTreeMap<BookId, BTreeMap<UserId, Rating>>,
}

#[async_trait]
pub trait Backend {
    /// Idempotent upsert of a book node, keyed by id
    async fn sync_book_node(&self, book: &Book) -> Result<()>;
    /// Idempotent upsert of a user node, keyed by id
    async fn sync_user_node(&self, id: UserId, username: &str) -> Result<()>;
    /// Idempotent upsert of a rating edge; at most one rating per (book, user) pair-- a re-sync
    /// overwrites
    async fn sync_review_relation(
        &self,
        book_id: BookId,
        user_id: UserId,
        rating: Rating,
    ) -> Result<()>;
    /// Books rated by others that `user_id` hasn't rated, ranked by `(average_rating,
    /// num_reviews)` descending & truncated to `limit`
    async fn recommend(&self, user_id: UserId, limit: usize) -> Result<Vec<Recommendation>>;
    async fn snapshot(&self) -> Result<Snapshot>;
    /// Test isolation hook
    async fn reset(&self) -> Result<()>;
}

/// The in-memory graph store
#[derive(Debug, Default)]
pub struct InMemory {
    state: RwLock<Snapshot>,
}

impl InMemory {
    pub fn new() -> InMemory {
        InMemory::default()
    }
}

#[async_trait]
impl Backend for InMemory {
    async fn sync_book_node(&self, book: &Book) -> Result<()> {
        self.state.write().await.books.insert(
            book.id,
            BookNode {
                id: book.id,
                title: book.title.clone(),
                author: book.author.clone(),
            },
        );
        Ok(())
    }
    async fn sync_user_node(&self, id: UserId, username: &str) -> Result<()> {
        self.state.write().await.users.insert(
            id,
            UserNode {
                id,
                username: username.to_owned(),
            },
        );
        Ok(())
    }
    async fn sync_review_relation(
        &self,
        book_id: BookId,
        user_id: UserId,
        rating: Rating,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .ratings
            .entry(book_id)
            .or_default()
            .insert(user_id, rating);
        Ok(())
    }
    async fn recommend(&self, user_id: UserId, limit: usize) -> Result<Vec<Recommendation>> {
        let state = self.state.read().await;
        // Stable sort over id-ascending candidates: ties beyond the compound key come back in
        // id order
        Ok(state
            .books
            .values()
            .filter_map(|book| {
                let ratings = state.ratings.get(&book.id)?;
                // Skip unrated books, and anything this user has already rated (no matter how
                // everyone else rated it)
                if ratings.is_empty() || ratings.contains_key(&user_id) {
                    return None;
                }
                let average = ratings.values().map(|r| r.as_u8() as u64).sum::<u64>() as f64
                    / ratings.len() as f64;
                Some(Recommendation {
                    book_id: book.id,
                    title: book.title.clone(),
                    author: book.author.clone(),
                    average_rating: round2(average),
                    num_reviews: ratings.len(),
                })
            })
            .sorted_by(|a, b| {
                b.average_rating
                    .total_cmp(&a.average_rating)
                    .then(b.num_reviews.cmp(&a.num_reviews))
            })
            .take(limit)
            .collect())
    }
    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.state.read().await.clone())
    }
    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.books.clear();
        state.users.clear();
        state.ratings.clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::Utc;

    fn book(id: u64, title: &str) -> Book {
        let now = Utc::now();
        Book {
            id: BookId::new(id),
            title: title.to_owned(),
            author: "Autora".to_owned(),
            published_year: None,
            isbn: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn rating(r: u8) -> Rating {
        Rating::try_from(r).unwrap()
    }

    #[tokio::test]
    async fn upserts_are_idempotent() {
        let graph = InMemory::new();
        let b = book(1, "Libro A");
        graph.sync_book_node(&b).await.unwrap();
        graph.sync_book_node(&b).await.unwrap();
        graph.sync_user_node(UserId::new(1), "lector").await.unwrap();
        graph
            .sync_review_relation(b.id, UserId::new(1), rating(3))
            .await
            .unwrap();
        // Re-rating overwrites the edge rather than duplicating it
        graph
            .sync_review_relation(b.id, UserId::new(1), rating(5))
            .await
            .unwrap();
        let snapshot = graph.snapshot().await.unwrap();
        assert_eq!(snapshot.books.len(), 1);
        assert_eq!(snapshot.ratings[&b.id].len(), 1);
        assert_eq!(snapshot.ratings[&b.id][&UserId::new(1)], rating(5));
    }

    #[tokio::test]
    async fn recommendations_exclude_rated_books() {
        let graph = InMemory::new();
        let (a, b) = (book(1, "Libro X"), book(2, "Libro Y"));
        graph.sync_book_node(&a).await.unwrap();
        graph.sync_book_node(&b).await.unwrap();
        let (user_a, user_b) = (UserId::new(1), UserId::new(2));
        // A rates X=5 & Y=4; B rates X=5
        graph.sync_review_relation(a.id, user_a, rating(5)).await.unwrap();
        graph.sync_review_relation(b.id, user_a, rating(4)).await.unwrap();
        graph.sync_review_relation(a.id, user_b, rating(5)).await.unwrap();

        let recs = graph.recommend(user_b, 5).await.unwrap();
        // X is excluded (B already rated it), no matter that it out-scores Y
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].book_id, b.id);
        assert_eq!(recs[0].average_rating, 4.0);
        assert_eq!(recs[0].num_reviews, 1);

        // ...and a user who has rated everything gets nothing
        assert!(graph.recommend(user_a, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ranking_and_truncation() {
        let graph = InMemory::new();
        let me = UserId::new(99);
        for (id, raters) in [(1, vec![5]), (2, vec![5, 5]), (3, vec![3]), (4, vec![])] {
            let b = book(id, &format!("Libro {}", id));
            graph.sync_book_node(&b).await.unwrap();
            for (i, r) in raters.iter().enumerate() {
                graph
                    .sync_review_relation(b.id, UserId::new(10 + i as u64), rating(*r))
                    .await
                    .unwrap();
            }
        }
        let recs = graph.recommend(me, 5).await.unwrap();
        // Book 4 has no ratings & is omitted; 2 beats 1 on review count at equal average
        let ids: Vec<u64> = recs.iter().map(|r| r.book_id.as_u64()).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let recs = graph.recommend(me, 2).await.unwrap();
        assert_eq!(recs.len(), 2);
    }

    #[tokio::test]
    async fn residual_ties_come_back_id_ascending() {
        let graph = InMemory::new();
        for id in [3, 1, 2] {
            let b = book(id, &format!("Libro {}", id));
            graph.sync_book_node(&b).await.unwrap();
            graph
                .sync_review_relation(b.id, UserId::new(10), rating(4))
                .await
                .unwrap();
        }
        let recs = graph.recommend(UserId::new(99), 5).await.unwrap();
        let ids: Vec<u64> = recs.iter().map(|r| r.book_id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
