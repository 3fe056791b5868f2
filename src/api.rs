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

//! # api
//!
//! ## Introduction
//!
//! The service layer: the route table plus one handler per resource, composing the stores behind
//! validation & authorization. The guard chain is a contract, not an accident: authentication is
//! checked *before* existence, which is checked *before* field validation, everywhere all three
//! apply. The ordering is directly observable in the status code (an anonymous `DELETE` of a
//! book that doesn't exist gets a 401, not a 404), and the integration suite pins it down.
//!
//! Handlers are plain `fn`s returning boxed futures so the route table can be a `static`; the
//! signature is the only ceremony here. Each handler owns *all* methods for its path and answers
//! 405 for the ones it doesn't implement.

use axum::http::{Method, StatusCode};
use futures::future::BoxFuture;
use lazy_static::lazy_static;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::{
    entities::{BookId, UserId},
    http::{Biblioteca, DetailBody, ErrorsBody, Request, Response},
    reviews,
    routing::{PathArgs, Router},
    serializers::{
        self, book_payload, errors_to_json, recommendation_payload, review_payload, ErrorMap,
    },
    tasks::{SyncBookReviews, SyncUserRecommendations},
};

pub const SERVICE_NAME: &str = "Biblioteca Online";
pub const SERVICE_VERSION: &str = "trabajo3";

pub const MSG_NOT_AUTHENTICATED: &str = "Credenciales de autenticación no proporcionadas.";
pub const MSG_BOOK_NOT_FOUND: &str = "Libro no encontrado.";
pub const MSG_NO_ROUTE: &str = "No encontrado.";
pub const MSG_BAD_JSON: &str = "Cuerpo JSON inválido.";
pub const MSG_INTERNAL: &str = "Error interno del servidor.";

/// How many recommendations a caller gets
pub const RECOMMENDATION_LIMIT: usize = 5;

pub type Handler = for<'a> fn(&'a Biblioteca, &'a Request, &'a PathArgs) -> BoxFuture<'a, Response>;

lazy_static! {
    static ref ROUTES: Router<Handler> = Router::new()
        .route("/api/health/", health as Handler, "api-health")
        .route(
            "/api/mongo/health/",
            mongo_health as Handler,
            "api-mongo-health"
        )
        .route("/api/books/", books_collection as Handler, "api-books-list")
        .route(
            "/api/books/<int:book_id>/",
            book_item as Handler,
            "api-books-detail"
        )
        .route(
            "/api/books/<int:book_id>/reviews/",
            book_reviews as Handler,
            "api-books-reviews"
        )
        .route(
            "/api/books/<int:book_id>/rating/",
            book_rating as Handler,
            "api-books-rating"
        )
        .route(
            "/api/recommendations/",
            recommendations as Handler,
            "api-recommendations"
        );
}

/// Resolve `request` against the route table & run the matching handler
///
/// This is the whole public surface of the service layer; the daemon (and the test suite) hand
/// requests in here and get [Response]s back.
pub async fn dispatch(app: &Biblioteca, request: &Request) -> Response {
    match ROUTES.resolve(&request.path) {
        Ok((route, args)) => {
            debug!(
                "{} {} → {}",
                request.method,
                request.path,
                route.name.as_deref().unwrap_or("<unnamed>")
            );
            (route.handler)(app, request, &args).await
        }
        Err(_) => detail(StatusCode::NOT_FOUND, MSG_NO_ROUTE),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      response constructors                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn detail(status: StatusCode, message: &str) -> Response {
    Response::json(
        status,
        serde_json::to_value(DetailBody {
            detail: message.to_owned(),
        })
        .unwrap(/* known good */),
    )
}

fn validation_failure(errors: &ErrorMap) -> Response {
    Response::json(
        StatusCode::BAD_REQUEST,
        serde_json::to_value(ErrorsBody {
            errors: errors_to_json(errors),
        })
        .unwrap(/* known good */),
    )
}

fn unauthorized() -> Response {
    detail(StatusCode::UNAUTHORIZED, MSG_NOT_AUTHENTICATED)
}

fn book_not_found() -> Response {
    detail(StatusCode::NOT_FOUND, MSG_BOOK_NOT_FOUND)
}

fn method_not_allowed(method: &Method) -> Response {
    detail(
        StatusCode::METHOD_NOT_ALLOWED,
        &format!("Método \"{}\" no permitido.", method),
    )
}

fn internal(err: impl std::fmt::Display) -> Response {
    error!("Internal failure serving a request: {}", err);
    detail(StatusCode::INTERNAL_SERVER_ERROR, MSG_INTERNAL)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            helpers                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Parse the request body as a JSON object; no body at all is an empty object, anything
/// unparseable (or a non-object) is a validation failure under `non_field_errors`
fn parse_body(request: &Request) -> std::result::Result<serde_json::Map<String, Value>, Response> {
    let bytes = match &request.body {
        None => return Ok(serde_json::Map::new()),
        Some(bytes) if bytes.is_empty() => return Ok(serde_json::Map::new()),
        Some(bytes) => bytes,
    };
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => {
            let mut errors = ErrorMap::new();
            errors
                .entry("non_field_errors".to_owned())
                .or_default()
                .push(MSG_BAD_JSON.to_owned());
            Err(validation_failure(&errors))
        }
    }
}

// The route templates for the item endpoints all declare `<int:book_id>`, so the parameter is
// present whenever these handlers run.
fn book_id(args: &PathArgs) -> BookId {
    BookId::new(args.int("book_id").unwrap_or_default())
}

/// Best-effort audit-trail write; a failed activity log is logged & swallowed, never surfaced to
/// the caller
async fn record_activity(
    app: &Biblioteca,
    event_type: &str,
    payload: serde_json::Map<String, Value>,
) {
    if let Err(err) = app.activity.log(event_type, payload).await {
        error!("Failed to record {} activity: {}", event_type, err);
    }
}

fn activity_payload(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            handlers                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn health<'a>(
    _app: &'a Biblioteca,
    request: &'a Request,
    _args: &'a PathArgs,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        if request.method != Method::GET {
            return method_not_allowed(&request.method);
        }
        Response::json(
            StatusCode::OK,
            json!({
                "service": SERVICE_NAME,
                "status": "ok",
                "version": SERVICE_VERSION,
            }),
        )
    })
}

/// `GET /api/mongo/health/`
///
/// The path is the wire contract inherited from the deployment this replaces (the document store
/// was Mongo); it reports on whatever [Backend](crate::storage::Backend) is actually behind the
/// reviews & the activity trail.
fn mongo_health<'a>(
    app: &'a Biblioteca,
    request: &'a Request,
    _args: &'a PathArgs,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        if request.method != Method::GET {
            return method_not_allowed(&request.method);
        }
        match app.documents.server_info().await {
            Ok(info) => Response::json(
                StatusCode::OK,
                json!({
                    "mongo_status": "ok",
                    "server_info": info,
                }),
            ),
            Err(err) => internal(err),
        }
    })
}

/// `GET`/`POST /api/books/`
fn books_collection<'a>(
    app: &'a Biblioteca,
    request: &'a Request,
    _args: &'a PathArgs,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        if request.method == Method::GET {
            let books: Vec<Value> = app.books.list().iter().map(book_payload).collect();
            Response::json(StatusCode::OK, Value::Array(books))
        } else if request.method == Method::POST {
            // Guard chain: authentication, then field validation
            let Some((_, username)) = request.principal.user() else {
                return unauthorized();
            };
            let body = match parse_body(request) {
                Ok(body) => body,
                Err(response) => return response,
            };
            let fields = match serializers::validate_book_input(&body, false) {
                Ok(fields) => fields,
                Err(errors) => return validation_failure(&errors),
            };
            let book = app.books.create(
                fields.title.as_deref().unwrap_or_default(),
                fields.author.as_deref().unwrap_or_default(),
                fields.published_year.flatten(),
                fields.isbn.flatten(),
                Some(username.to_owned()),
            );
            record_activity(
                app,
                "book.created",
                activity_payload(&[
                    ("book_id", json!(book.id)),
                    ("title", json!(book.title)),
                    ("user", json!(username)),
                ]),
            )
            .await;
            Response::json(StatusCode::CREATED, book_payload(&book))
        } else {
            method_not_allowed(&request.method)
        }
    })
}

/// `GET`/`PUT`/`PATCH`/`DELETE /api/books/<int:book_id>/`
fn book_item<'a>(
    app: &'a Biblioteca,
    request: &'a Request,
    args: &'a PathArgs,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        let id = book_id(args);
        if request.method == Method::GET {
            let book = match app.books.get(id) {
                Ok(book) => book,
                Err(_) => return book_not_found(),
            };
            // Read-time join: the average & count are recomputed from the live review store on
            // every request, never cached on the book
            let (average, count) = match app.reviews.average_rating(id).await {
                Ok(pair) => pair,
                Err(err) => return internal(err),
            };
            let mut payload = book_payload(&book);
            if let Some(map) = payload.as_object_mut() {
                map.insert("average_rating".to_owned(), json!(average));
                map.insert("reviews_count".to_owned(), json!(count));
            }
            Response::json(StatusCode::OK, payload)
        } else if request.method == Method::PUT || request.method == Method::PATCH {
            // Guard chain: authentication, then existence, then field validation
            let Some((_, username)) = request.principal.user() else {
                return unauthorized();
            };
            if !app.books.contains(id) {
                return book_not_found();
            }
            let body = match parse_body(request) {
                Ok(body) => body,
                Err(response) => return response,
            };
            let partial = request.method == Method::PATCH;
            let fields = match serializers::validate_book_input(&body, partial) {
                Ok(fields) => fields,
                Err(errors) => return validation_failure(&errors),
            };
            let book = match app.books.update(id, fields.into()) {
                Ok(book) => book,
                // Deleted between the existence check & the update
                Err(_) => return book_not_found(),
            };
            record_activity(
                app,
                "book.updated",
                activity_payload(&[
                    ("book_id", json!(book.id)),
                    ("user", json!(username)),
                    ("partial", json!(partial)),
                ]),
            )
            .await;
            Response::json(StatusCode::OK, book_payload(&book))
        } else if request.method == Method::DELETE {
            let Some((_, username)) = request.principal.user() else {
                return unauthorized();
            };
            if app.books.delete(id).is_err() {
                return book_not_found();
            }
            record_activity(
                app,
                "book.deleted",
                activity_payload(&[("book_id", json!(id)), ("user", json!(username))]),
            )
            .await;
            Response::no_content()
        } else {
            method_not_allowed(&request.method)
        }
    })
}

/// `GET`/`POST /api/books/<int:book_id>/reviews/`
fn book_reviews<'a>(
    app: &'a Biblioteca,
    request: &'a Request,
    args: &'a PathArgs,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        let id = book_id(args);
        if request.method == Method::GET {
            if !app.books.contains(id) {
                return book_not_found();
            }
            match app.reviews.reviews_for_book(id).await {
                Ok(reviews) => Response::json(
                    StatusCode::OK,
                    Value::Array(reviews.iter().map(review_payload).collect()),
                ),
                Err(err) => internal(err),
            }
        } else if request.method == Method::POST {
            // Guard chain: authentication, then existence, then field validation-- an anonymous
            // review of a missing book is a 401, not a 404
            let Some((user_id, username)) = request.principal.user() else {
                return unauthorized();
            };
            if !app.books.contains(id) {
                return book_not_found();
            }
            let body = match parse_body(request) {
                Ok(body) => body,
                Err(response) => return response,
            };
            let review = match app
                .reviews
                .create_review(
                    id,
                    user_id,
                    Some(username),
                    body.get("rating"),
                    body.get("comment"),
                )
                .await
            {
                Ok(review) => review,
                Err(err) => return review_failure(err),
            };
            dispatch_post_review_tasks(app, id, user_id).await;
            record_activity(
                app,
                "review.created",
                activity_payload(&[
                    ("book_id", json!(id)),
                    ("user", json!(username)),
                    ("rating", json!(review.rating)),
                ]),
            )
            .await;
            Response::json(StatusCode::CREATED, review_payload(&review))
        } else {
            method_not_allowed(&request.method)
        }
    })
}

/// Map a review-creation failure onto the field → messages body (or a 500, if the store itself
/// failed)
fn review_failure(err: reviews::Error) -> Response {
    let field = match &err {
        reviews::Error::InvalidRating { .. } => "rating",
        reviews::Error::InvalidComment { .. } => "comment",
        reviews::Error::Storage { .. } => return internal(err),
    };
    let mut errors = ErrorMap::new();
    errors
        .entry(field.to_owned())
        .or_default()
        .push(err.to_string());
    validation_failure(&errors)
}

/// Fire-and-forget post-processing after a successful review: re-derive the book's graph state,
/// and recompute the author's recommendations (unless the user id is the reserved zero). Submit
/// failures are logged & swallowed; the caller's 201 doesn't depend on them.
async fn dispatch_post_review_tasks(app: &Biblioteca, book_id: BookId, user_id: UserId) {
    if let Err(err) = app
        .tasks
        .submit(Box::new(SyncBookReviews { book_id }))
        .await
    {
        error!("Failed to dispatch graph resync for book {}: {}", book_id, err);
    }
    if user_id.is_zero() {
        return;
    }
    if let Err(err) = app
        .tasks
        .submit(Box::new(SyncUserRecommendations {
            user_id,
            limit: RECOMMENDATION_LIMIT,
        }))
        .await
    {
        error!(
            "Failed to dispatch recommendation recompute for user {}: {}",
            user_id, err
        );
    }
}

/// `GET /api/books/<int:book_id>/rating/`
fn book_rating<'a>(
    app: &'a Biblioteca,
    request: &'a Request,
    args: &'a PathArgs,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        if request.method != Method::GET {
            return method_not_allowed(&request.method);
        }
        let id = book_id(args);
        if !app.books.contains(id) {
            return book_not_found();
        }
        match app.reviews.average_rating(id).await {
            Ok((average, count)) => Response::json(
                StatusCode::OK,
                json!({
                    "book_id": id,
                    "average_rating": average,
                    "num_reviews": count,
                }),
            ),
            Err(err) => internal(err),
        }
    })
}

/// `GET /api/recommendations/`
fn recommendations<'a>(
    app: &'a Biblioteca,
    request: &'a Request,
    _args: &'a PathArgs,
) -> BoxFuture<'a, Response> {
    Box::pin(async move {
        if request.method != Method::GET {
            return method_not_allowed(&request.method);
        }
        let Some((user_id, _)) = request.principal.user() else {
            return unauthorized();
        };
        match app.graph.recommend(user_id, RECOMMENDATION_LIMIT).await {
            Ok(recommendations) => Response::json(
                StatusCode::OK,
                Value::Array(
                    recommendations
                        .iter()
                        .map(recommendation_payload)
                        .collect(),
                ),
            ),
            Err(err) => internal(err),
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;

    use crate::{
        activity::Activity,
        background_tasks::Eager,
        books::BookStore,
        entities::Principal,
        graph,
        reviews::Reviews,
        storage,
    };

    fn app() -> Biblioteca {
        let books = Arc::new(BookStore::new());
        let documents = Arc::new(storage::InMemory::new());
        let reviews = Arc::new(Reviews::new(documents.clone()));
        let activity = Arc::new(Activity::new(documents.clone()));
        let graph: Arc<dyn graph::Backend + Send + Sync> = Arc::new(graph::InMemory::new());
        let context = crate::background_tasks::Context {
            books: books.clone(),
            reviews: reviews.clone(),
            graph: graph.clone(),
        };
        Biblioteca {
            books,
            documents,
            reviews,
            activity,
            graph,
            tasks: Arc::new(Eager::new(context)),
        }
    }

    fn reader() -> Principal {
        Principal::User {
            id: crate::entities::UserId::new(1),
            username: "lector".to_owned(),
        }
    }

    #[tokio::test]
    async fn health_reports_the_service() {
        let app = app();
        let response = dispatch(&app, &Request::new(Method::GET, "/api/health/")).await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.body.unwrap();
        assert_eq!(body["service"], json!(SERVICE_NAME));
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["version"], json!(SERVICE_VERSION));
    }

    #[tokio::test]
    async fn the_document_store_reports_healthy() {
        let app = app();
        let response = dispatch(&app, &Request::new(Method::GET, "/api/mongo/health/")).await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.body.unwrap();
        assert_eq!(body["mongo_status"], json!("ok"));
        assert!(body["server_info"].is_object());
    }

    #[tokio::test]
    async fn unrouted_paths_get_a_localized_404() {
        let app = app();
        let response = dispatch(&app, &Request::new(Method::GET, "/api/nothing/")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body.unwrap()["detail"], json!(MSG_NO_ROUTE));
    }

    #[tokio::test]
    async fn unmatched_methods_get_a_405() {
        let app = app();
        let response = dispatch(&app, &Request::new(Method::DELETE, "/api/health/")).await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn creating_a_book_requires_authentication() {
        let app = app();
        let request = Request::new(Method::POST, "/api/books/")
            .with_body(br#"{"title": "t", "author": "a"}"#.to_vec());
        let response = dispatch(&app, &request).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.body.unwrap()["detail"],
            json!(MSG_NOT_AUTHENTICATED)
        );
        assert!(app.books.list().is_empty());
    }

    #[tokio::test]
    async fn validation_failures_are_per_field() {
        let app = app();
        let request = Request::new(Method::POST, "/api/books/")
            .with_body(br#"{"published_year": "soon"}"#.to_vec())
            .with_principal(reader());
        let response = dispatch(&app, &request).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        let errors = &response.body.unwrap()["errors"];
        assert!(errors["title"].as_array().is_some());
        assert!(errors["author"].as_array().is_some());
        assert!(errors["published_year"].as_array().is_some());
    }

    #[tokio::test]
    async fn malformed_bodies_land_under_non_field_errors() {
        let app = app();
        let request = Request::new(Method::POST, "/api/books/")
            .with_body(b"not json".to_vec())
            .with_principal(reader());
        let response = dispatch(&app, &request).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.body.unwrap()["errors"]["non_field_errors"]
            .as_array()
            .is_some());
    }

    #[tokio::test]
    async fn authentication_precedes_existence() {
        let app = app();
        // No book 999; an anonymous DELETE must still be told to authenticate first
        let response =
            dispatch(&app, &Request::new(Method::DELETE, "/api/books/999/")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let response = dispatch(
            &app,
            &Request::new(Method::DELETE, "/api/books/999/").with_principal(reader()),
        )
        .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn book_detail_is_enriched_with_live_review_data() {
        let app = app();
        let book = app
            .books
            .create("Libro", "Autora", None, None, Some("lector".to_owned()));
        app.reviews
            .create_review(
                book.id,
                crate::entities::UserId::new(1),
                Some("lector"),
                Some(&json!(4)),
                None,
            )
            .await
            .unwrap();
        let response = dispatch(
            &app,
            &Request::new(Method::GET, &format!("/api/books/{}/", book.id)),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.body.unwrap();
        assert_eq!(body["average_rating"], json!(4.0));
        assert_eq!(body["reviews_count"], json!(1));
    }

    #[tokio::test]
    async fn review_creation_feeds_the_graph() {
        let app = app();
        let book = app
            .books
            .create("Libro", "Autora", None, None, Some("lector".to_owned()));
        let request = Request::new(
            Method::POST,
            &format!("/api/books/{}/reviews/", book.id),
        )
        .with_body(br#"{"rating": 5, "comment": "genial"}"#.to_vec())
        .with_principal(reader());
        let response = dispatch(&app, &request).await;
        assert_eq!(response.status, StatusCode::CREATED);
        // The eager sender ran SyncBookReviews inline, so the edge is already in the graph
        let snapshot = app.graph.snapshot().await.unwrap();
        assert!(snapshot.ratings.contains_key(&book.id));
    }
}
