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

//! # reviews
//!
//! The review service: write-validated review documents & read-side aggregation.
//!
//! Reviews live in the document store (collection `book_reviews`), one document per review.
//! Validation happens *before* persistence-- an out-of-range or non-numeric rating never makes
//! it to rest (the round-trip property the rest of the system leans on). Note that this service
//! does *not* check that the reviewed book exists; that's the service layer's job, since only it
//! knows whether a missing book should read as 404 or 401 for a given request.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use snafu::prelude::*;
use tracing::warn;

use crate::{
    entities::{self, normalize_comment, BookId, DocumentId, Rating, Review, UserId},
    storage::{Backend, Document, Filter},
};

/// Name of the backing collection; mirrors the original deployment's Mongo collection
pub const COLLECTION: &str = "book_reviews";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    InvalidComment { source: entities::Error },
    #[snafu(display("{source}"))]
    InvalidRating { source: entities::Error },
    #[snafu(display("Document store failure: {source}"))]
    Storage { source: crate::storage::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Round half-away-from-zero to two decimal places; used for every average we surface
pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The review service
pub struct Reviews {
    storage: Arc<dyn Backend + Send + Sync>,
}

impl Reviews {
    pub fn new(storage: Arc<dyn Backend + Send + Sync>) -> Reviews {
        Reviews { storage }
    }
    /// Validate & persist a review; `rating` and `comment` are the raw JSON values from the
    /// request body. On a validation failure nothing is persisted.
    pub async fn create_review(
        &self,
        book_id: BookId,
        user_id: UserId,
        username: Option<&str>,
        rating: Option<&Value>,
        comment: Option<&Value>,
    ) -> Result<Review> {
        let rating = Rating::from_json(rating).context(InvalidRatingSnafu)?;
        let comment = normalize_comment(comment).context(InvalidCommentSnafu)?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut document = Document::new();
        document.insert("book_id".to_owned(), book_id.as_u64().into());
        document.insert("user_id".to_owned(), user_id.as_u64().into());
        document.insert(
            "username".to_owned(),
            username.map(Value::from).unwrap_or(Value::Null),
        );
        document.insert("rating".to_owned(), rating.as_u8().into());
        document.insert(
            "comment".to_owned(),
            comment.clone().map(Value::from).unwrap_or(Value::Null),
        );
        document.insert("created_at".to_owned(), timestamp.clone().into());
        document.insert("updated_at".to_owned(), timestamp.clone().into());

        let id = self
            .storage
            .insert_one(COLLECTION, document)
            .await
            .context(StorageSnafu)?;
        Ok(Review {
            id,
            book_id,
            user_id,
            username: username.map(str::to_owned),
            rating,
            comment,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        })
    }
    /// All reviews for `book_id`, newest-first by `created_at` (our timestamps are zero-padded
    /// ISO-8601, so lexicographic order is chronological order)
    pub async fn reviews_for_book(&self, book_id: BookId) -> Result<Vec<Review>> {
        let mut reviews: Vec<Review> = self
            .storage
            .find(COLLECTION, &Filter::all().eq("book_id", book_id.as_u64()))
            .await
            .context(StorageSnafu)?
            .iter()
            .filter_map(review_from_document)
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }
    /// The average rating & review count for `book_id`; the average is `None` (not zero) when
    /// there are no reviews
    pub async fn average_rating(&self, book_id: BookId) -> Result<(Option<f64>, usize)> {
        let ratings: Vec<i64> = self
            .storage
            .find(COLLECTION, &Filter::all().eq("book_id", book_id.as_u64()))
            .await
            .context(StorageSnafu)?
            .iter()
            // Only numeric ratings count; anything else some other writer snuck in is skipped
            .filter_map(|doc| doc.get("rating").and_then(Value::as_i64))
            .collect();
        if ratings.is_empty() {
            return Ok((None, 0));
        }
        let average = ratings.iter().sum::<i64>() as f64 / ratings.len() as f64;
        Ok((Some(round2(average)), ratings.len()))
    }
    /// How many reviews exist for `book_id`
    pub async fn count_for_book(&self, book_id: BookId) -> Result<usize> {
        self.storage
            .count(COLLECTION, &Filter::all().eq("book_id", book_id.as_u64()))
            .await
            .context(StorageSnafu)
    }
    /// Test isolation hook
    pub async fn reset(&self) -> Result<()> {
        self.storage
            .delete_many(COLLECTION, &Filter::all())
            .await
            .context(StorageSnafu)?;
        Ok(())
    }
}

/// Rehydrate a [Review] from a stored document; a document that doesn't conform is logged &
/// dropped rather than failing the whole read
fn review_from_document(document: &Document) -> Option<Review> {
    let rating = document
        .get("rating")
        .and_then(Value::as_u64)
        .and_then(|r| Rating::try_from(r as u8).ok());
    let Some(rating) = rating else {
        warn!("Dropping malformed review document {:?}", document.get("_id"));
        return None;
    };
    Some(Review {
        id: DocumentId::new(
            document
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        ),
        book_id: BookId::new(document.get("book_id").and_then(Value::as_u64)?),
        user_id: UserId::new(document.get("user_id").and_then(Value::as_u64).unwrap_or(0)),
        username: document
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_owned),
        rating,
        comment: document
            .get("comment")
            .and_then(Value::as_str)
            .map(str::to_owned),
        created_at: document
            .get("created_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        updated_at: document
            .get("updated_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    })
}
