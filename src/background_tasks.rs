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

//! # Background Task Processing
//!
//! Request handlers spawn post-processing (graph resync, recommendation recompute) off the "hot
//! path" of serving the request: the handler submits a task & returns; the task runs nearline,
//! best-effort, and its completion or failure is not observable to the caller. That's the
//! contract-- fire-and-forget, at-least-once-ish, no ordering guarantee relative to subsequent
//! requests-- and it's tolerable precisely because the resync task is a full re-derivation from
//! the source-of-truth reviews, so a lost or repeated run self-heals.
//!
//! # Design
//!
//! An explicit job-queue interface rather than a decorator trick: [Sender] is the `submit()`
//! side, [Receiver] the harvest side, and [Processor] a tokio loop driving harvested tasks
//! forward in a [JoinSet] until told to shut down. [Queue] implements both ends in memory;
//! [Eager] implements [Sender] by just running the task inline, which is the synchronous test
//! double-- same interface, no queue, effects visible as soon as `submit()` returns.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use tokio::{
    sync::{Mutex, Notify},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error};

use crate::{books::BookStore, graph::Backend as GraphBackend, reviews::Reviews};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    // Generic error variant trait implementations can use
    #[snafu(display("{source}"))]
    Background {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
    #[snafu(display("Task processing failed to run to completion: {source}"))]
    Join {
        source: tokio::task::JoinError,
        backtrace: Backtrace,
    },
    #[snafu(display("Timeout shutting-down the task processor: {source}"))]
    ShutdownTimeout {
        source: tokio::time::error::Elapsed,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to wait for in-flight tasks: {source}"))]
    Timeout { source: tokio::time::error::Elapsed },
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Background {
            source: Box::new(err),
            backtrace: Backtrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             tasks                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Trait defining a "task" for our purposes: anything [Send] that can convert itself into an
/// async computation against a context `C`. Note that `exec()` consumes the task.
// This trait *must* be object-safe: the processor handles tasks generically, and the senders
// traffic in `Box<dyn Task<C>>`.
#[async_trait]
pub trait Task<C>: Send {
    /// Consume this task, carrying out its work against `context`
    async fn exec(self: Box<Self>, context: C) -> Result<()>;
    /// A short human-readable tag for logging
    fn describe(&self) -> String;
    fn timeout(&self) -> Option<Duration>;
}

/// The `submit()` end of the job queue
///
/// Generic over the context type so that implementors can pin down exactly which tasks they
/// accept; object-safe so the application state can hold `Arc<dyn Sender<Context>>` & swap the
/// queued implementation for the eager one in tests.
#[async_trait]
pub trait Sender<C> {
    async fn submit(&self, task: Box<dyn Task<C>>) -> Result<()>;
}

/// The harvest end of the job queue
#[async_trait]
pub trait Receiver<C> {
    async fn take_task(&self) -> Result<Option<Box<dyn Task<C>>>>;
}

/// Blanket implementation for [Arc]s; if `T` is a [Receiver], then so is `Arc<T>`.
#[async_trait]
impl<C, T: Receiver<C> + Send + Sync> Receiver<C> for Arc<T> {
    async fn take_task(&self) -> Result<Option<Box<dyn Task<C>>>> {
        self.as_ref().take_task().await
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      queue implementations                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The in-memory job queue: [Sender] on one side, [Receiver] on the other
///
/// Tasks submitted here survive only as long as the process-- an accepted gap (see the module
/// docs); a production deployment would persist them.
pub struct Queue<C> {
    tasks: Mutex<VecDeque<Box<dyn Task<C>>>>,
}

impl<C> Default for Queue<C> {
    fn default() -> Self {
        Queue::new()
    }
}

impl<C> Queue<C> {
    pub fn new() -> Queue<C> {
        Queue {
            tasks: Mutex::new(VecDeque::new()),
        }
    }
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

#[async_trait]
impl<C: Send> Sender<C> for Queue<C> {
    async fn submit(&self, task: Box<dyn Task<C>>) -> Result<()> {
        debug!("Queueing background task {}", task.describe());
        self.tasks.lock().await.push_back(task);
        Ok(())
    }
}

#[async_trait]
impl<C: Send> Receiver<C> for Queue<C> {
    async fn take_task(&self) -> Result<Option<Box<dyn Task<C>>>> {
        Ok(self.tasks.lock().await.pop_front())
    }
}

/// The eager [Sender]: executes the task inline, on the caller's stack
///
/// Execution failures are logged & swallowed, exactly as they would be in the queued
/// arrangement-- the fire-and-forget contract doesn't change just because the "queue" is
/// synchronous.
pub struct Eager<C> {
    context: C,
}

impl<C> Eager<C> {
    pub fn new(context: C) -> Eager<C> {
        Eager { context }
    }
}

#[async_trait]
impl<C: Clone + Send + Sync> Sender<C> for Eager<C> {
    async fn submit(&self, task: Box<dyn Task<C>>) -> Result<()> {
        let what = task.describe();
        if let Err(err) = task.exec(self.context.clone()).await {
            error!("Background task {} failed: {}", what, err);
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          the processor                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Configuration parameters for processing background tasks
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Timeout that will be used for any task that doesn't define its own
    #[serde(rename = "default-timeout")]
    pub default_timeout: Duration,
    /// The maximum number of tasks to drive concurrently
    #[serde(rename = "max-concurrent-tasks")]
    pub max_concurrent_tasks: usize,
    /// Amount of time to sleep when we have no tasks in process
    #[serde(rename = "sleep-duration")]
    pub sleep_duration: Duration,
    /// Amount of time to wait for in-flight tasks on shutdown
    #[serde(rename = "shutdown-timeout")]
    pub shutdown_timeout: Duration,
    /// Maximum amount of time to drive in-flight tasks without attempting to pick-up new tasks
    #[serde(rename = "pickup-timeout")]
    pub pickup_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_concurrent_tasks: 16,
            sleep_duration: Duration::from_millis(100),
            shutdown_timeout: Duration::from_millis(500),
            pickup_timeout: Duration::from_millis(1000),
        }
    }
}

/// [Processor] manages the ongoing processing of background tasks; hold onto it & call
/// `shutdown()` to stop the loop and drain in-flight tasks.
pub struct Processor {
    processor: JoinHandle<Result<()>>,
    shutdown: Arc<Notify>,
}

impl Processor {
    /// Consume the instance, signal the processing task to shut down & wait up to `timeout` for
    /// it to exit
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        self.shutdown.notify_one();
        tokio::time::timeout(timeout, self.processor)
            .await
            .context(ShutdownTimeoutSnafu)?
            .context(JoinSnafu)?
    }
}

/// Process background tasks. `receiver` is a [Receiver] from which we draw tasks; `shutdown` is
/// a [Notify] the caller can use to signal this function to exit.
async fn process<C: Clone + Send + 'static, R: Receiver<C>>(
    receiver: R,
    context: C,
    config: Config,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let mut futures = JoinSet::new();
    let mut done = false;
    while !done {
        // So long as we don't have too much on our plate, try 'n grab another task:
        if futures.len() < config.max_concurrent_tasks {
            if let Some(task) = receiver.take_task().await? {
                let what = task.describe();
                let timeout = task.timeout().unwrap_or(config.default_timeout);
                let context = context.clone();
                futures.spawn(async move {
                    match tokio::time::timeout(timeout, task.exec(context)).await {
                        Ok(Ok(())) => debug!("Background task {} complete", what),
                        // Failure isn't observable to the submitter; all we can do is log it
                        Ok(Err(err)) => error!("Background task {} failed: {}", what, err),
                        Err(_) => error!("Background task {} timed-out", what),
                    }
                });
            }
        }

        if !futures.is_empty() {
            // We've got at least one task; drive 'em all forward, while waiting on our shutdown
            // notification:
            tokio::select! {
                _ = futures.join_next() => (),
                // If a single long-running task is in flight, stop periodically so we can
                // pick-up new tasks rather than getting stuck in this `select!`
                _ = tokio::time::sleep(config.pickup_timeout) => (),
                _ = shutdown.notified() => {
                    done = true;
                }
            }
        } else {
            // We have no tasks; hang out a bit before attempting to pick one up, while
            // remaining mindful of our shutdown notification:
            tokio::select! {
                _ = tokio::time::sleep(config.sleep_duration) => (),
                _ = shutdown.notified() => {
                    done = true;
                }
            }
        }
    }

    // Give any in-flight tasks a chance to complete:
    tokio::time::timeout(config.shutdown_timeout, futures.join_all())
        .await
        .context(TimeoutSnafu)?;

    Ok(())
}

/// Create a new [Processor] given a [Receiver]
pub fn new<C: Clone + Send + 'static, R: Receiver<C> + Send + 'static>(
    receiver: R,
    context: C,
    config: Option<Config>,
) -> Processor {
    let shutdown = Arc::new(Notify::new());
    let processor = tokio::spawn(process(
        receiver,
        context,
        config.unwrap_or_default(),
        shutdown.clone(),
    ));
    Processor {
        processor,
        shutdown,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         task context                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What a biblioteca background task gets to work with
#[derive(Clone)]
pub struct Context {
    pub books: Arc<BookStore>,
    pub reviews: Arc<Reviews>,
    pub graph: Arc<dyn GraphBackend + Send + Sync>,
}
