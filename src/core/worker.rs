//! # ListenerWorker: the reconnecting listener loop.
//!
//! Runs in one background task per [`Listener`](crate::Listener) and owns at
//! most one [`Session`] at a time.
//!
//! ## State machine
//! ```text
//!             ┌──────────────────────────────────────────────┐
//!             ▼                                              │
//!       Connecting ── connect + replay active ──► Idle ◄──┐  │
//!             │                                   │ │     │  │
//!             │ err                 open check ok │ │ 5 s │  │
//!             │                 + pending head    │ └─────┘  │
//!             │                                   ▼          │
//!             │                              Declaring ──────┤ ok: promote → Idle
//!             ▼                                   │ err      │
//!       ReconnectWait ◄───────────────────────────┘          │
//!             │  warn once per outage, sleep(backoff)        │
//!             └──────────────────────────────────────────────┘
//!
//! token.cancelled() at any await ──► close session ──► Stopped
//! ```
//!
//! ## Rules
//! - Active subscriptions are redeclared, in insertion order, before any
//!   pending one is looked at.
//! - A failed declaration keeps the subscription at the head of pending.
//! - Every failure while holding a session tears the session down (bounded,
//!   errors swallowed) before waiting.
//! - The outage attempt counter resets on every successful connect.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::registry::Registry;
use crate::error::EventError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;
use crate::session::{ConnectorRef, Session};
use crate::subscription::Subscription;

/// Loop parameters, taken from [`Config`](crate::Config).
#[derive(Clone, Debug)]
pub(crate) struct WorkerParams {
    pub reconnect: BackoffPolicy,
    pub pending_timeout: Duration,
    pub open_check_timeout: Duration,
}

enum Phase {
    Connecting,
    Idle(Box<dyn Session>),
    Declaring(Box<dyn Session>, Arc<Subscription>),
    ReconnectWait(EventError),
}

pub(crate) struct ListenerWorker {
    pub name: Arc<str>,
    pub connector: ConnectorRef,
    pub registry: Arc<Registry>,
    pub bus: Bus,
    pub params: WorkerParams,
}

impl ListenerWorker {
    /// Runs until `token` is cancelled.
    pub(crate) async fn run(self, token: CancellationToken) {
        let mut phase = Phase::Connecting;
        let mut attempt: u32 = 0;
        let mut outage = false;

        loop {
            phase = match phase {
                Phase::Connecting => {
                    let Some(res) = cancellable(&token, self.connector.connect()).await else {
                        break;
                    };
                    let mut session = match res {
                        Ok(session) => session,
                        Err(e) => {
                            phase = Phase::ReconnectWait(e);
                            continue;
                        }
                    };
                    match cancellable(&token, self.replay(session.as_mut())).await {
                        None => {
                            self.close(session).await;
                            break;
                        }
                        Some(Err(e)) => self.teardown(session, e).await,
                        Some(Ok(count)) => {
                            info!(listener = %self.name, replayed = count, "connected to event bus");
                            self.bus.publish(
                                Event::new(EventKind::Connected)
                                    .with_component(Arc::clone(&self.name))
                                    .with_count(count),
                            );
                            attempt = 0;
                            outage = false;
                            Phase::Idle(session)
                        }
                    }
                }

                Phase::Idle(mut session) => {
                    match cancellable(&token, self.check_open(session.as_mut())).await {
                        None => {
                            self.close(session).await;
                            break;
                        }
                        Some(Err(e)) => self.teardown(session, e).await,
                        Some(Ok(())) => {
                            let wait = time::timeout(
                                self.params.pending_timeout,
                                self.registry.next_pending(),
                            );
                            match cancellable(&token, wait).await {
                                None => {
                                    self.close(session).await;
                                    break;
                                }
                                Some(Err(_elapsed)) => Phase::Idle(session),
                                Some(Ok(sub)) => Phase::Declaring(session, sub),
                            }
                        }
                    }
                }

                Phase::Declaring(mut session, sub) => {
                    match cancellable(&token, self.declare(session.as_mut(), &sub)).await {
                        None => {
                            self.close(session).await;
                            break;
                        }
                        Some(Err(e)) => {
                            debug!(listener = %self.name, subscription = %sub, "declaration failed, kept pending");
                            self.teardown(session, e).await
                        }
                        Some(Ok(())) => {
                            self.registry.promote(&sub);
                            self.bus.publish(
                                Event::new(EventKind::SubscriptionDeclared)
                                    .with_component(Arc::clone(&self.name))
                                    .with_subscription(sub.to_string()),
                            );
                            Phase::Idle(session)
                        }
                    }
                }

                Phase::ReconnectWait(err) => {
                    if !outage {
                        warn!(listener = %self.name, label = err.as_label(), "connection error: {err}");
                        outage = true;
                    } else {
                        debug!(listener = %self.name, attempt, "still disconnected: {err}");
                    }

                    let delay = self.params.reconnect.next(attempt);
                    self.bus.publish(
                        Event::new(EventKind::ReconnectScheduled)
                            .with_component(Arc::clone(&self.name))
                            .with_delay(delay)
                            .with_attempt(attempt)
                            .with_error(err.to_string()),
                    );
                    attempt = attempt.saturating_add(1);

                    if cancellable(&token, time::sleep(delay)).await.is_none() {
                        break;
                    }
                    Phase::Connecting
                }
            };
        }

        info!(listener = %self.name, "listener stopped");
        self.bus.publish(
            Event::new(EventKind::ListenerStopped).with_component(Arc::clone(&self.name)),
        );
    }

    /// Redeclares every active subscription, in order.
    async fn replay(&self, session: &mut dyn Session) -> Result<usize, EventError> {
        let active = self.registry.active();
        for sub in &active {
            sub.declare_on_remote(session).await?;
        }
        Ok(active.len())
    }

    async fn check_open(&self, session: &mut dyn Session) -> Result<(), EventError> {
        let timeout = self.params.open_check_timeout;
        time::timeout(timeout, session.ensure_open())
            .await
            .map_err(|_elapsed| EventError::OpenCheckTimeout { timeout })?
    }

    async fn declare(
        &self,
        session: &mut dyn Session,
        sub: &Arc<Subscription>,
    ) -> Result<(), EventError> {
        self.check_open(session).await?;
        sub.declare_on_remote(session).await
    }

    async fn teardown(&self, session: Box<dyn Session>, err: EventError) -> Phase {
        self.bus.publish(
            Event::new(EventKind::ConnectionLost)
                .with_component(Arc::clone(&self.name))
                .with_error(err.to_string()),
        );
        self.close(session).await;
        Phase::ReconnectWait(err)
    }

    async fn close(&self, mut session: Box<dyn Session>) {
        // A dead broker may never answer the close handshake.
        if time::timeout(self.params.open_check_timeout, session.close())
            .await
            .is_err()
        {
            debug!(listener = %self.name, "session close timed out");
        }
    }
}

/// Runs `fut` unless `token` fires first.
async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}
