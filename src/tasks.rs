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

//! # tasks
//!
//! The concrete background tasks dispatched after a review is written.
//!
//! [SyncBookReviews] is deliberately a *full re-derivation* of one book's slice of the graph
//! from the review store's current data, not an incremental patch: combined with the graph's
//! idempotent upserts, running it twice (or after a partial prior failure) lands on the same
//! snapshot as running it once, which is what makes fire-and-forget dispatch tolerable.

use std::time::Duration;

use async_trait::async_trait;

use tracing::{debug, info};

use crate::{
    background_tasks::{Context, Error, Result, Task},
    entities::{BookId, UserId},
};

/// Re-derive one book's graph state (its node, its raters' nodes, its rating edges) from the
/// review store
pub struct SyncBookReviews {
    pub book_id: BookId,
}

#[async_trait]
impl Task<Context> for SyncBookReviews {
    async fn exec(self: Box<Self>, context: Context) -> Result<()> {
        let book = match context.books.get(self.book_id) {
            Ok(book) => book,
            Err(_) => {
                // The book went away between dispatch & execution; nothing to sync
                info!("Skipping graph resync for missing book {}", self.book_id);
                return Ok(());
            }
        };
        context
            .graph
            .sync_book_node(&book)
            .await
            .map_err(Error::new)?;
        let reviews = context
            .reviews
            .reviews_for_book(self.book_id)
            .await
            .map_err(Error::new)?;
        let synced = reviews.len();
        for review in reviews {
            let username = review
                .username
                .unwrap_or_else(|| format!("user-{}", review.user_id));
            context
                .graph
                .sync_user_node(review.user_id, &username)
                .await
                .map_err(Error::new)?;
            context
                .graph
                .sync_review_relation(self.book_id, review.user_id, review.rating)
                .await
                .map_err(Error::new)?;
        }
        debug!("Synced {} review(s) of book {} to the graph", synced, self.book_id);
        Ok(())
    }
    fn describe(&self) -> String {
        format!("sync-book-reviews({})", self.book_id)
    }
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Recompute a user's recommendation list from the graph
///
/// The list itself is discarded (the recommendations endpoint recomputes on read); what this
/// buys us is a warmed graph & a log line an operator can correlate with the triggering review.
pub struct SyncUserRecommendations {
    pub user_id: UserId,
    pub limit: usize,
}

#[async_trait]
impl Task<Context> for SyncUserRecommendations {
    async fn exec(self: Box<Self>, context: Context) -> Result<()> {
        let recommendations = context
            .graph
            .recommend(self.user_id, self.limit)
            .await
            .map_err(Error::new)?;
        debug!(
            "Recomputed {} recommendation(s) for user {}",
            recommendations.len(),
            self.user_id
        );
        Ok(())
    }
    fn describe(&self) -> String {
        format!("sync-user-recommendations({})", self.user_id)
    }
    fn timeout(&self) -> Option<Duration> {
        None
    }
}
