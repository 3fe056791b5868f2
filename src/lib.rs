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

//! # biblioteca
//!
//! An online book catalogue: book CRUD, user-submitted reviews, and graph-backed recommendation
//! lookups. The library crate holds everything transport-independent: the route table, the
//! stores, the service layer and the background task machinery. The `bibliotecad` binary is a
//! thin [axum] adapter over [`api::dispatch`].
//!
//! [axum]: https://docs.rs/axum/latest/axum/index.html

pub mod activity;
pub mod api;
pub mod background_tasks;
pub mod books;
pub mod entities;
pub mod graph;
pub mod http;
pub mod reviews;
pub mod routing;
pub mod serializers;
pub mod storage;
pub mod tasks;
