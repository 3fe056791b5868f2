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

//! # biblioteca models
//!
//! ## Introduction
//!
//! I hate these sort of "catch-all" modules named "models" or "entities", but these types are
//! truly foundational: books, reviews, ratings, activity events & the request principal. The
//! refined types ([Rating], especially) carry their validation with them, so a [Rating] at rest
//! is in-range by construction.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("El comentario debe ser texto"))]
    CommentNotText,
    #[snafu(display("El rating es obligatorio"))]
    RatingMissing,
    #[snafu(display("El rating debe ser un número entero"))]
    RatingNotInteger,
    #[snafu(display("El rating debe estar entre 1 y 5"))]
    RatingOutOfRange { value: i64 },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

// In a prior life these were wrapped-up in a macro; with just two numeric identifiers left it's
// less code to implement them by hand.

/// Identifier for a [Book]; assigned by the [BookStore], starting at one & strictly increasing
/// over the store's lifetime (ids are never re-used, even after deletes).
///
/// [BookStore]: crate::books::BookStore
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct BookId(u64);

impl BookId {
    pub fn new(id: u64) -> BookId {
        BookId(id)
    }
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BookId {
    fn from(id: u64) -> Self {
        BookId(id)
    }
}

/// Identifier for a user. Zero is reserved to mean "no user"; callers that dispatch per-user work
/// are expected to skip it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> UserId {
        UserId(id)
    }
    pub fn as_u64(&self) -> u64 {
        self.0
    }
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id)
    }
}

/// Opaque, store-assigned identifier for a [Review] (or any other document, for that matter).
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: String) -> DocumentId {
        DocumentId(id)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Rating                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing a review rating: an integer on [1,5]
///
/// Construction is the *only* validation point; a [Rating] held anywhere downstream (the review
/// store, the graph) is in-range by construction. Callers hand us the raw JSON value from the
/// request body; we accept an integer, or a string that parses as a whole number, in range.
/// Anything else (a float, a non-numeric string, a boolean) is rejected.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub fn from_json(value: Option<&Value>) -> Result<Rating> {
        let raw: i64 = match value {
            None | Some(Value::Null) => return RatingMissingSnafu.fail(),
            Some(Value::Number(n)) => n.as_i64().context(RatingNotIntegerSnafu)?,
            Some(Value::String(s)) => {
                let s = s.trim();
                ensure!(!s.is_empty(), RatingMissingSnafu);
                ensure!(
                    s.bytes().all(|b| b.is_ascii_digit()),
                    RatingNotIntegerSnafu
                );
                i64::from_str(s).ok().context(RatingNotIntegerSnafu)?
            }
            Some(_) => return RatingNotIntegerSnafu.fail(),
        };
        ensure!((1..=5).contains(&raw), RatingOutOfRangeSnafu { value: raw });
        Ok(Rating(raw as u8))
    }
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `Rating`
impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = <u8 as Deserialize>::deserialize(deserializer)?;
        Rating::try_from(n).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<u8> for Rating {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ensure!(
            (1..=5).contains(&value),
            RatingOutOfRangeSnafu {
                value: value as i64
            }
        );
        Ok(Rating(value))
    }
}

/// Normalize a review comment from the raw JSON value: missing or null means "no comment", text
/// is trimmed (an all-whitespace comment also becomes "no comment"), and anything non-textual is
/// an error.
pub fn normalize_comment(value: Option<&Value>) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_owned()))
        }
        Some(_) => CommentNotTextSnafu.fail(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Domain entities                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A book record, as held by the [BookStore]
///
/// Invariants: `id` is unique & stable for the record's lifetime; `updated_at` is never earlier
/// than `created_at`; updates never touch `id` or `created_at`.
///
/// [BookStore]: crate::books::BookStore
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub published_year: Option<i64>,
    pub isbn: Option<String>,
    /// Principal identifier captured at creation time
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user-submitted review of a [Book], as read back from the document store
///
/// The book reference is *not* enforced at the store level; checking that the book exists is the
/// service layer's job.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Review {
    pub id: DocumentId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub rating: Rating,
    pub comment: Option<String>,
    /// ISO-8601, zero-padded; lexicographic order is chronological order
    pub created_at: String,
    pub updated_at: String,
}

/// A write-only audit-trail event
#[derive(Clone, Debug, Serialize)]
pub struct ActivityEvent {
    pub event_type: String,
    pub payload: serde_json::Map<String, Value>,
    pub created_at: String,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Principal                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The authenticated-or-anonymous identity associated with a request
///
/// How a request comes to carry one of these is the transport adapter's business (the daemon maps
/// bearer tokens to users); the service layer only ever asks "is there an authenticated user, and
/// who?"
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Principal {
    Anonymous,
    User { id: UserId, username: String },
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User { .. })
    }
    /// The authenticated user, if any
    pub fn user(&self) -> Option<(UserId, &str)> {
        match self {
            Principal::Anonymous => None,
            Principal::User { id, username } => Some((*id, username.as_str())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::json;

    #[test]
    fn ratings() {
        assert_eq!(Rating::from_json(Some(&json!(3))).unwrap().as_u8(), 3);
        assert_eq!(Rating::from_json(Some(&json!("5"))).unwrap().as_u8(), 5);
        assert_eq!(Rating::from_json(Some(&json!(" 4 "))).unwrap().as_u8(), 4);
        assert!(matches!(
            Rating::from_json(None),
            Err(Error::RatingMissing)
        ));
        assert!(matches!(
            Rating::from_json(Some(&Value::Null)),
            Err(Error::RatingMissing)
        ));
        assert!(matches!(
            Rating::from_json(Some(&json!(""))),
            Err(Error::RatingMissing)
        ));
        assert!(matches!(
            Rating::from_json(Some(&json!(0))),
            Err(Error::RatingOutOfRange { .. })
        ));
        assert!(matches!(
            Rating::from_json(Some(&json!(10))),
            Err(Error::RatingOutOfRange { .. })
        ));
        assert!(matches!(
            Rating::from_json(Some(&json!(3.5))),
            Err(Error::RatingNotInteger)
        ));
        assert!(matches!(
            Rating::from_json(Some(&json!("tres"))),
            Err(Error::RatingNotInteger)
        ));
        assert!(matches!(
            Rating::from_json(Some(&json!("-3"))),
            Err(Error::RatingNotInteger)
        ));
        assert!(matches!(
            Rating::from_json(Some(&json!(true))),
            Err(Error::RatingNotInteger)
        ));
    }

    #[test]
    fn ratings_validate_on_deserialization() {
        // The refined type's invariant survives the serde path, too
        assert_eq!(
            serde_json::from_value::<Rating>(json!(4)).unwrap().as_u8(),
            4
        );
        assert!(serde_json::from_value::<Rating>(json!(6)).is_err());
        assert!(serde_json::from_value::<Rating>(json!(0)).is_err());
        // ...and a Review (which holds one) round-trips through JSON
        let review: Review = serde_json::from_value(json!({
            "id": "abc",
            "book_id": 1,
            "user_id": 2,
            "username": "lector",
            "rating": 5,
            "comment": null,
            "created_at": "2026-01-01T00:00:00.000000Z",
            "updated_at": "2026-01-01T00:00:00.000000Z",
        }))
        .unwrap();
        assert_eq!(review.rating.as_u8(), 5);
    }

    #[test]
    fn comments() {
        assert_eq!(normalize_comment(None).unwrap(), None);
        assert_eq!(normalize_comment(Some(&Value::Null)).unwrap(), None);
        assert_eq!(normalize_comment(Some(&json!("  "))).unwrap(), None);
        assert_eq!(
            normalize_comment(Some(&json!("  genial  "))).unwrap(),
            Some("genial".to_owned())
        );
        assert!(matches!(
            normalize_comment(Some(&json!(42))),
            Err(Error::CommentNotText)
        ));
    }

    #[test]
    fn principals() {
        assert!(!Principal::Anonymous.is_authenticated());
        let p = Principal::User {
            id: UserId::new(7),
            username: "lector".to_owned(),
        };
        assert_eq!(p.user(), Some((UserId::new(7), "lector")));
    }
}
