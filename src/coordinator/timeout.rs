use std::time::Duration;

use tokio::task::JoinHandle;

use super::{Inbound, TimerKind};

/// A single-shot countdown. Arming replaces any previous countdown with a
/// fresh one under a new generation; a fired timer whose generation is no
/// longer current is discarded by the coordinator.
pub struct Countdown {
    kind: TimerKind,
    inbox: async_channel::Sender<Inbound>,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl Countdown {
    pub fn new(kind: TimerKind, inbox: async_channel::Sender<Inbound>) -> Self {
        Self {
            kind,
            inbox,
            generation: 0,
            handle: None,
        }
    }

    /// Start a fresh countdown, never a resumed one.
    pub fn arm(&mut self, window: Duration) -> u64 {
        self.disarm();

        self.generation += 1;
        let generation = self.generation;
        let kind = self.kind;
        let inbox = self.inbox.clone();

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = inbox.send(Inbound::TimerFired { kind, generation }).await;
        }));

        generation
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.disarm();
    }
}
