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

//! # http
//!
//! The request/response types threaded through the service layer, and the application state.
//!
//! These are deliberately *not* axum's types: the service layer is transport-independent (the
//! integration suite drives it without a socket in sight), so a request here is an explicit,
//! fully-tagged struct-- method, path, body, principal-- rather than an attribute-flexible
//! framework object. The daemon adapts axum requests into these at the edge.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    activity::Activity,
    background_tasks::{Context as TaskContext, Sender as TaskSender},
    books::BookStore,
    entities::Principal,
    graph::Backend as GraphBackend,
    reviews::Reviews,
    storage::Backend as StorageBackend,
};

/// A request as seen by the service layer
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Raw request body; `None` for bodyless methods
    pub body: Option<Vec<u8>>,
    pub principal: Principal,
}

impl Request {
    pub fn new(method: Method, path: &str) -> Request {
        Request {
            method,
            path: path.to_owned(),
            body: None,
            principal: Principal::Anonymous,
        }
    }
    pub fn with_body(mut self, body: Vec<u8>) -> Request {
        self.body = Some(body);
        self
    }
    pub fn with_principal(mut self, principal: Principal) -> Request {
        self.principal = principal;
        self
    }
}

/// A response as produced by the service layer; the daemon maps this onto an HTTP response
#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    /// JSON body; `None` for 204-style empty responses
    pub body: Option<Value>,
}

impl Response {
    pub fn json(status: StatusCode, body: Value) -> Response {
        Response {
            status,
            body: Some(body),
        }
    }
    pub fn no_content() -> Response {
        Response {
            status: StatusCode::NO_CONTENT,
            body: None,
        }
    }
}

/// Body shape for "terminal" failures (404/401/405): a single localized message
#[derive(Debug, Deserialize, Serialize)]
pub struct DetailBody {
    pub detail: String,
}

/// Body shape for validation failures: a field → messages mapping (several fields may report at
/// once; malformed-body errors land under `non_field_errors`)
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorsBody {
    pub errors: serde_json::Map<String, Value>,
}

/// Application state available to all handlers
///
/// Each store owns its records exclusively; this struct is constructed once at process start and
/// passed by [Arc] into the service layer. No ambient globals-- tests build their own with the
/// eager task sender & call `reset()` on the stores between scenarios.
pub struct Biblioteca {
    pub books: Arc<BookStore>,
    /// The raw document store; the review & activity services layer over this same handle, but
    /// the health endpoint pings it directly
    pub documents: Arc<dyn StorageBackend + Send + Sync>,
    pub reviews: Arc<Reviews>,
    pub activity: Arc<Activity>,
    pub graph: Arc<dyn GraphBackend + Send + Sync>,
    pub tasks: Arc<dyn TaskSender<TaskContext> + Send + Sync>,
}

impl Biblioteca {
    /// The context handed to background tasks; shares the live stores
    pub fn task_context(&self) -> TaskContext {
        TaskContext {
            books: self.books.clone(),
            reviews: self.reviews.clone(),
            graph: self.graph.clone(),
        }
    }
}
