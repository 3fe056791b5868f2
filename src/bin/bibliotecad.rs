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

//! # bibliotecad
//!
//! The biblioteca daemon: an HTTP shim over the service layer.
//!
//! # Introduction
//!
//! The service layer in [biblioteca] is transport-free; this binary is the transport. It binds a
//! listening socket, maps each incoming HTTP request onto a service-layer [Request] (including
//! resolving the bearer token to a [Principal](biblioteca::entities::Principal)), dispatches it
//! through the route table, and maps the [Response] back out. Background task processing runs on
//! an in-process queue alongside the server, shut down gracefully on SIGTERM/SIGINT.

use std::{
    collections::HashMap,
    future::IntoFuture,
    io,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use axum::{body::to_bytes, extract::State, response::IntoResponse};
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};

use biblioteca::{
    activity::Activity,
    api,
    background_tasks::{self, Queue},
    books::BookStore,
    entities::{Principal, UserId},
    graph,
    http::{Biblioteca, Request, Response},
    reviews::Reviews,
    storage,
};

/// The bibliotecad application error type
///
/// [Debug] is implemented by hand: `main()` returns `Result<(), Error>`, and on the `Err` arm the
/// runtime prints the `Debug` representation to stderr, which for the derived implementation is
/// unreadable.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to shut-down background task processing: {source}"))]
    BackgroundShutdown { source: background_tasks::Error },
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Unable to read configuration file: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("The server exited unexpectedly: {source}"))]
    Serve { source: std::io::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One entry in the static bearer-token table
#[derive(Clone, Debug, Deserialize)]
pub struct AuthUser {
    pub token: String,
    pub id: u64,
    pub username: String,
}

/// bibliotecad configuration, version one
#[derive(Clone, Debug, Deserialize)]
struct ConfigV1 {
    /// Local address at which to listen for API requests; specify as "address:port"
    #[serde(rename = "listen-address")]
    listen_address: SocketAddr,
    /// Static token → user table; requests carrying no recognized token run as anonymous
    #[serde(default)]
    users: Vec<AuthUser>,
    #[serde(rename = "background-tasks", default)]
    background_tasks: background_tasks::Config,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            listen_address: "0.0.0.0:8000".parse::<SocketAddr>().unwrap(/* known good */),
            users: Vec::new(),
            background_tasks: background_tasks::Config::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the bibliotecad configuration file; if no path was given and the default doesn't exist,
/// fall back to the built-in defaults
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/bibliotecad.toml").unwrap(), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

/// Configure bibliotecad logging
///
/// Logs go to stdout (the usual case is a container); `--plain` selects human-readable compact
/// output over JSON. This method can only be invoked once (it calls tracing's
/// [set_global_default](tracing::subscriber::set_global_default)).
fn configure_logging(logopts: &LogOpts) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    // `compact()` & `json()` produce layers *of different types*; it is for this reason that
    // `Box<dyn Layer<S> + Send + Sync>` implements `Layer`:
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        )
    };

    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Shared state for the transport shim: the application itself plus the token table
struct AppState {
    app: Biblioteca,
    tokens: HashMap<String, (UserId, String)>,
}

/// Largest request body we'll buffer; our payloads are small JSON objects
const MAX_BODY_BYTES: usize = 1 << 20;

/// Resolve the `Authorization` header against the token table
fn principal_for(
    headers: &axum::http::HeaderMap,
    tokens: &HashMap<String, (UserId, String)>,
) -> Principal {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| tokens.get(token.trim()))
        .map(|(id, username)| Principal::User {
            id: *id,
            username: username.clone(),
        })
        .unwrap_or(Principal::Anonymous)
}

/// The one axum handler: adapt the HTTP request into a service-layer [Request], dispatch, adapt
/// the [Response] back out
async fn handle(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("Failed to read a request body: {}", err);
            return axum::http::StatusCode::BAD_REQUEST.into_response();
        }
    };
    let principal = principal_for(&parts.headers, &state.tokens);
    let mut request = Request::new(parts.method, parts.uri.path()).with_principal(principal);
    if !bytes.is_empty() {
        request = request.with_body(bytes.to_vec());
    }
    let Response { status, body } = api::dispatch(&state.app, &request).await;
    match body {
        Some(body) => (status, axum::Json(body)).into_response(),
        None => status.into_response(),
    }
}

fn make_router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .fallback(handle)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve biblioteca API requests until SIGTERM or SIGINT
async fn serve(cfg: ConfigV1) -> Result<()> {
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sigterm = signal(SignalKind::terminate()).unwrap();
    let mut sigint = signal(SignalKind::interrupt()).unwrap();

    let books = Arc::new(BookStore::new());
    let documents = Arc::new(storage::InMemory::new());
    let reviews = Arc::new(Reviews::new(documents.clone()));
    let activity = Arc::new(Activity::new(documents.clone()));
    let graph: Arc<dyn graph::Backend + Send + Sync> = Arc::new(graph::InMemory::new());

    // Task dispatch & processing share one in-memory queue
    let queue = Arc::new(Queue::new());
    let context = background_tasks::Context {
        books: books.clone(),
        reviews: reviews.clone(),
        graph: graph.clone(),
    };
    let processor =
        background_tasks::new(queue.clone(), context, Some(cfg.background_tasks.clone()));

    let app = Biblioteca {
        books,
        documents,
        reviews,
        activity,
        graph,
        tasks: queue,
    };
    let tokens = cfg
        .users
        .iter()
        .map(|u| (u.token.clone(), (UserId::new(u.id), u.username.clone())))
        .collect();
    let state = Arc::new(AppState { app, tokens });

    let nfy = Arc::new(Notify::new());
    let server = axum::serve(
        TcpListener::bind(&cfg.listen_address).await.context(BindSnafu {
            addr: cfg.listen_address,
        })?,
        make_router(state),
    )
    .with_graceful_shutdown(shutdown_signal(nfy.clone()));

    info!("bibliotecad listening on {}.", cfg.listen_address);

    let mut server = std::pin::pin!(server.into_future());
    tokio::select! {
        res = &mut server => {
            // The server should never exit on its own
            error!("The server exited early; shutting-down.");
            return res.context(ServeSnafu);
        }
        _ = sigterm.recv() => info!("Received SIGTERM; terminating."),
        _ = sigint.recv() => info!("Received SIGINT; terminating."),
    };

    // Signal the server to stop accepting connections & drain, then stop the task processor
    nfy.notify_one();
    if let Err(err) = server.await {
        error!("{:?}", err);
    }
    processor
        .shutdown(Duration::from_secs(5))
        .await
        .context(BackgroundShutdownSnafu)?;

    Ok(())
}

fn main() -> Result<()> {
    let matches = Command::new("bibliotecad")
        .version(crate_version!())
        .author(crate_authors!())
        .about("An online book catalogue")
        .long_about(
            "`bibliotecad` serves the biblioteca book-catalogue API: books, reviews, an \
             activity trail & graph-driven recommendations.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .env("BIBLIOTECA_CONFIG")
                .help(
                    "path (absolute or relative to the process' current directory) to a \
                     configuration file",
                ),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BIBLIOTECA_DEBUG")
                .help("produce debug output"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BIBLIOTECA_PLAIN")
                .help("log in human-readable format, not JSON/structured logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BIBLIOTECA_QUIET")
                .help("produce only error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BIBLIOTECA_VERBOSE")
                .help("produce prolix output"),
        )
        .get_matches();

    let opts = CliOpts {
        log_opts: LogOpts::new(&matches),
        cfg: matches.get_one::<PathBuf>("config").cloned(),
    };

    let cfg = parse_config(&opts.cfg)?;
    configure_logging(&opts.log_opts)?;

    info!("biblioteca version {} starting.", crate_version!());

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(serve(cfg))
}
