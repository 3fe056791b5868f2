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

//! # serializers
//!
//! Payload shaping for responses & field validation for incoming book payloads.
//!
//! Validation is an explicit per-field table-- field name, required-ness, validation function--
//! executed field-by-field with the failures merged into one field → messages map, so a caller
//! who botched both `title` and `published_year` hears about both at once rather than
//! fixing-and-resubmitting twice. The messages are the (Spanish) strings the original deployment
//! shipped; clients match on them.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    books::BookPatch,
    entities::{Book, Review},
    graph::Recommendation,
};

pub const MSG_REQUIRED: &str = "Este campo es obligatorio.";
pub const MSG_NOT_A_STRING: &str = "Debe ser una cadena.";
pub const MSG_NOT_AN_INTEGER: &str = "Debe ser un número entero.";

/// Field → messages; [BTreeMap] so the serialized order is deterministic
pub type ErrorMap = BTreeMap<String, Vec<String>>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        output payloads                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The fixed field set we expose for a book: `id, title, author, published_year, isbn,
/// created_by` (timestamps stay internal)
pub fn book_payload(book: &Book) -> Value {
    serde_json::json!({
        "id": book.id,
        "title": book.title,
        "author": book.author,
        "published_year": book.published_year,
        "isbn": book.isbn,
        "created_by": book.created_by,
    })
}

pub fn review_payload(review: &Review) -> Value {
    serde_json::to_value(review).unwrap(/* known good */)
}

pub fn recommendation_payload(recommendation: &Recommendation) -> Value {
    serde_json::to_value(recommendation).unwrap(/* known good */)
}

pub fn errors_to_json(errors: &ErrorMap) -> serde_json::Map<String, Value> {
    errors
        .iter()
        .map(|(field, messages)| {
            (
                field.clone(),
                Value::Array(messages.iter().cloned().map(Value::from).collect()),
            )
        })
        .collect()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        input validation                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The cleaned result of validating a book payload; `None` on the outside means "not supplied",
/// `None` on the inside (for the nullable fields) means "supplied as null/empty-- clear it"
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookFields {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_year: Option<Option<i64>>,
    pub isbn: Option<Option<String>>,
}

impl From<BookFields> for BookPatch {
    fn from(fields: BookFields) -> BookPatch {
        BookPatch {
            title: fields.title,
            author: fields.author,
            published_year: fields.published_year,
            isbn: fields.isbn,
        }
    }
}

/// A cleaned field value, as produced by a validator
#[derive(Clone, Debug, PartialEq)]
enum FieldValue {
    Text(Option<String>),
    Year(Option<i64>),
}

type Validator = fn(&Value, bool) -> std::result::Result<FieldValue, Vec<String>>;

/// The validator table: field name → required-ness → validation function. Order here is the
/// order fields are examined in (and hence message accumulation order).
const FIELDS: &[(&str, bool, Validator)] = &[
    ("title", true, validate_text),
    ("author", true, validate_text),
    ("published_year", false, validate_year),
    ("isbn", false, validate_text),
];

fn validate_text(value: &Value, required: bool) -> std::result::Result<FieldValue, Vec<String>> {
    match value {
        Value::Null => {
            if required {
                Err(vec![MSG_REQUIRED.to_owned()])
            } else {
                Ok(FieldValue::Text(None))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                if required {
                    Err(vec![MSG_REQUIRED.to_owned()])
                } else {
                    // An all-whitespace optional field (isbn) is "absent", not empty
                    Ok(FieldValue::Text(None))
                }
            } else {
                Ok(FieldValue::Text(Some(trimmed.to_owned())))
            }
        }
        _ => Err(vec![MSG_NOT_A_STRING.to_owned()]),
    }
}

fn validate_year(value: &Value, _required: bool) -> std::result::Result<FieldValue, Vec<String>> {
    match value {
        Value::Null => Ok(FieldValue::Year(None)),
        Value::Number(n) => match n.as_i64() {
            Some(year) => Ok(FieldValue::Year(Some(year))),
            None => Err(vec![MSG_NOT_AN_INTEGER.to_owned()]),
        },
        Value::String(s) => {
            // Only the exactly-empty string clears the field; whitespace is not a year
            if s.is_empty() {
                return Ok(FieldValue::Year(None));
            }
            let trimmed = s.trim();
            if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
                trimmed
                    .parse::<i64>()
                    .map(|year| FieldValue::Year(Some(year)))
                    .map_err(|_| vec![MSG_NOT_AN_INTEGER.to_owned()])
            } else {
                Err(vec![MSG_NOT_AN_INTEGER.to_owned()])
            }
        }
        _ => Err(vec![MSG_NOT_AN_INTEGER.to_owned()]),
    }
}

/// Validate an incoming book payload
///
/// In full mode (create, PUT) the required fields must be present & valid; in partial mode
/// (PATCH) only supplied fields are examined. Either way every supplied field is checked & the
/// failures collected-- not fail-fast.
pub fn validate_book_input(
    data: &serde_json::Map<String, Value>,
    partial: bool,
) -> std::result::Result<BookFields, ErrorMap> {
    let mut cleaned: BTreeMap<&str, FieldValue> = BTreeMap::new();
    let mut errors = ErrorMap::new();
    for (name, required, validator) in FIELDS {
        if let Some(value) = data.get(*name) {
            match validator(value, *required) {
                Ok(value) => {
                    cleaned.insert(*name, value);
                }
                Err(messages) => {
                    errors.entry((*name).to_owned()).or_default().extend(messages);
                }
            }
        }
    }
    for (name, required, _) in FIELDS {
        if *required && !cleaned.contains_key(name) {
            if partial && !data.contains_key(*name) {
                continue;
            }
            errors
                .entry((*name).to_owned())
                .or_default()
                .push(MSG_REQUIRED.to_owned());
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    let mut fields = BookFields::default();
    for (name, value) in cleaned {
        match (name, value) {
            ("title", FieldValue::Text(text)) => fields.title = text,
            ("author", FieldValue::Text(text)) => fields.author = text,
            ("published_year", FieldValue::Year(year)) => fields.published_year = Some(year),
            ("isbn", FieldValue::Text(text)) => fields.isbn = Some(text),
            _ => unreachable!(), // The table pairs each name with exactly one value shape
        }
    }
    Ok(fields)
}
