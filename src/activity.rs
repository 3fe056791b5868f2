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

//! # activity
//!
//! A minimal write-only audit trail over the document store (collection `activity_logs`): the
//! service layer drops an event for every mutation it performs, and operators can read the most
//! recent events back, newest-first. No relations, no updates, no deletes (other than the test
//! isolation hook).

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use snafu::prelude::*;

use crate::{
    entities::{ActivityEvent, DocumentId},
    storage::{Backend, Document, Filter},
};

pub const COLLECTION: &str = "activity_logs";

pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Document store failure: {source}"))]
    Storage { source: crate::storage::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// The activity-log service
pub struct Activity {
    storage: Arc<dyn Backend + Send + Sync>,
}

impl Activity {
    pub fn new(storage: Arc<dyn Backend + Send + Sync>) -> Activity {
        Activity { storage }
    }
    /// Record an event; returns the store-assigned identifier
    pub async fn log(
        &self,
        event_type: &str,
        payload: serde_json::Map<String, Value>,
    ) -> Result<DocumentId> {
        let mut document = Document::new();
        document.insert("event_type".to_owned(), event_type.into());
        document.insert("payload".to_owned(), Value::Object(payload));
        document.insert(
            "created_at".to_owned(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .into(),
        );
        self.storage
            .insert_one(COLLECTION, document)
            .await
            .context(StorageSnafu)
    }
    /// The most recent events, newest-first, truncated to `limit`
    pub async fn recent(&self, limit: usize) -> Result<Vec<ActivityEvent>> {
        let mut events: Vec<ActivityEvent> = self
            .storage
            .find(COLLECTION, &Filter::all())
            .await
            .context(StorageSnafu)?
            .into_iter()
            .map(|document| ActivityEvent {
                event_type: document
                    .get("event_type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                payload: match document.get("payload") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => serde_json::Map::new(),
                },
                created_at: document
                    .get("created_at")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            })
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        Ok(events)
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
