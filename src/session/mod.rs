//! The persistent ride session.
//!
//! One [`Session`] owns one logical bidirectional connection to the dispatch
//! backend. Every inbound message is tagged with the session id that was
//! current when it was read, so a stale connection can never deliver events
//! into a newer ride attempt's state machine.

pub mod protocol;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::ReconnectPolicy;
use crate::error::{session_closed_error, Error};
use protocol::{ClientMessage, ServerMessage};
use transport::{MessageSink, MessageStream, Transport};

pub type SessionId = u64;

#[derive(Debug)]
pub enum SessionEvent {
    Message {
        session_id: SessionId,
        message: ServerMessage,
    },
    /// The connection dropped; reconnect attempts are starting.
    Disconnected { session_id: SessionId },
    /// A reconnect attempt succeeded; the session id is unchanged.
    Reconnected { session_id: SessionId },
    /// Reconnect attempts are exhausted; the session is dead.
    ConnectionFailed {
        session_id: SessionId,
        message: String,
    },
}

enum SessionCommand {
    Send(ClientMessage),
    Close,
}

pub struct Session {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    events: async_channel::Sender<SessionEvent>,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    id: Arc<AtomicU64>,
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        events: async_channel::Sender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            policy,
            events,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    /// Establish the connection. Idempotent: a second call while connected
    /// returns the current session id without side effects.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self) -> Result<SessionId, Error> {
        let mut active = self.active.lock().await;

        if let Some(session) = active.as_ref() {
            if !session.task.is_finished() {
                return Ok(session.id.load(Ordering::SeqCst));
            }
        }

        let (sink, stream) = self.transport.connect().await?;

        let id = Arc::new(AtomicU64::new(self.next_id.fetch_add(1, Ordering::SeqCst)));
        let session_id = id.load(Ordering::SeqCst);

        let (command_tx, command_rx) = mpsc::channel(32);

        let task = tokio::spawn(run_session(
            sink,
            stream,
            Arc::clone(&id),
            command_rx,
            self.events.clone(),
            Arc::clone(&self.transport),
            self.policy.clone(),
        ));

        *active = Some(ActiveSession {
            id,
            commands: command_tx,
            task,
        });

        tracing::info!(session_id, "session connected");

        Ok(session_id)
    }

    /// Tear the connection down and stop event delivery.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) {
        if let Some(session) = self.active.lock().await.take() {
            let _ = session.commands.send(SessionCommand::Close).await;
        }
    }

    /// Send a message, lazily connecting first if the session is down.
    pub async fn send(&self, message: ClientMessage) -> Result<(), Error> {
        self.connect().await?;

        let active = self.active.lock().await;
        let session = active.as_ref().ok_or_else(session_closed_error)?;

        session
            .commands
            .send(SessionCommand::Send(message))
            .await
            .map_err(|_| session_closed_error())
    }

    pub async fn current_id(&self) -> Option<SessionId> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| session.id.load(Ordering::SeqCst))
    }

    /// Invalidate the active session id without dropping the connection.
    /// Messages already in flight carry the old id and are discarded by the
    /// coordinator's stale-event guard.
    pub async fn rotate(&self) -> Option<SessionId> {
        let active = self.active.lock().await;
        let session = active.as_ref()?;

        let fresh = self.next_id.fetch_add(1, Ordering::SeqCst);
        session.id.store(fresh, Ordering::SeqCst);

        tracing::debug!(session_id = fresh, "session id rotated");

        Some(fresh)
    }
}

async fn run_session(
    mut sink: Box<dyn MessageSink>,
    mut stream: Box<dyn MessageStream>,
    id: Arc<AtomicU64>,
    mut commands: mpsc::Receiver<SessionCommand>,
    events: async_channel::Sender<SessionEvent>,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
) {
    loop {
        let reconnect = drive(&mut sink, &mut stream, &id, &mut commands, &events).await;

        if !reconnect {
            return;
        }

        let session_id = id.load(Ordering::SeqCst);
        tracing::warn!(session_id, "session connection lost");
        let _ = events
            .send(SessionEvent::Disconnected { session_id })
            .await;

        match reconnect_with_policy(transport.as_ref(), &policy, &mut commands).await {
            ReconnectOutcome::Restored(new_sink, new_stream) => {
                sink = new_sink;
                stream = new_stream;

                let session_id = id.load(Ordering::SeqCst);
                tracing::info!(session_id, "session reconnected");
                let _ = events.send(SessionEvent::Reconnected { session_id }).await;
            }
            ReconnectOutcome::Closed => return,
            ReconnectOutcome::Exhausted(attempts) => {
                let session_id = id.load(Ordering::SeqCst);
                let _ = events
                    .send(SessionEvent::ConnectionFailed {
                        session_id,
                        message: format!("reconnect failed after {} attempts", attempts),
                    })
                    .await;
                return;
            }
        }
    }
}

/// Pump one live connection. Returns `true` when the connection should be
/// re-established, `false` on deliberate shutdown.
async fn drive(
    sink: &mut Box<dyn MessageSink>,
    stream: &mut Box<dyn MessageStream>,
    id: &Arc<AtomicU64>,
    commands: &mut mpsc::Receiver<SessionCommand>,
    events: &async_channel::Sender<SessionEvent>,
) -> bool {
    loop {
        tokio::select! {
            frame = stream.next_message() => match frame {
                Ok(Some(message)) => {
                    let session_id = id.load(Ordering::SeqCst);
                    if events
                        .send(SessionEvent::Message { session_id, message })
                        .await
                        .is_err()
                    {
                        // nobody is listening anymore
                        sink.close().await;
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(err) => {
                    tracing::warn!(%err, "session read error");
                    return true;
                }
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Send(message)) => {
                    if let Err(err) = sink.send(message).await {
                        tracing::warn!(%err, "session write error");
                        return true;
                    }
                }
                Some(SessionCommand::Close) | None => {
                    sink.close().await;
                    return false;
                }
            },
        }
    }
}

enum ReconnectOutcome {
    Restored(Box<dyn MessageSink>, Box<dyn MessageStream>),
    Closed,
    Exhausted(u32),
}

async fn reconnect_with_policy(
    transport: &dyn Transport,
    policy: &ReconnectPolicy,
    commands: &mut mpsc::Receiver<SessionCommand>,
) -> ReconnectOutcome {
    for attempt in 1..=policy.max_attempts {
        let delay = compute_backoff(policy, attempt) + jitter();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    Some(SessionCommand::Send(_)) => {
                        tracing::debug!("dropping outbound message while disconnected");
                    }
                    Some(SessionCommand::Close) | None => return ReconnectOutcome::Closed,
                },
            }
        }

        match transport.connect().await {
            Ok((sink, stream)) => return ReconnectOutcome::Restored(sink, stream),
            Err(err) => {
                tracing::warn!(attempt, %err, "reconnect attempt failed");
            }
        }
    }

    ReconnectOutcome::Exhausted(policy.max_attempts)
}

/// Exponential backoff for attempt `n`: `base * 2^(n-1)`, capped.
fn compute_backoff(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    policy
        .base_delay
        .saturating_mul(multiplier)
        .min(policy.max_delay)
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..250))
}
