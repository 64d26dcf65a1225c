//! Static message router
//!
//! The wiring is fixed before any thread starts: [`RouterBuilder::connect`]
//! adds `(source, tag) → destination` edges, [`RouterBuilder::build`] creates
//! one independent crossbeam queue per destination. Each endpoint then
//! takes its [`Outbox`] (for sending) and [`Mailbox`] (for receiving).
//!
//! ```text
//!  Outbox(Control) ──ToModel──►┌──────────────┐
//!  Outbox(Midi)    ──ToModel──►│ Mailbox(Model)│──► model loop
//!  Outbox(Iface)   ──ToModel──►└──────────────┘
//!
//!  Outbox(Control) ──Exit────► every Exit destination
//! ```
//!
//! Payload tags have exactly one destination per source, so a message is
//! owned by one receiver. Only [`Tag::Exit`] fans out, and it carries no
//! payload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;

use super::message::{Endpoint, Message, Tag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("{from} already routes {tag:?} to {existing}")]
    AlreadyConnected {
        from: Endpoint,
        tag: Tag,
        existing: Endpoint,
    },

    #[error("{from} has no route for {tag:?}")]
    NoRoute { from: Endpoint, tag: Tag },

    #[error("{0} is no longer receiving")]
    Disconnected(Endpoint),

    #[error("Exit is a broadcast, use Outbox::broadcast_exit")]
    ExitIsBroadcast,
}

enum Envelope {
    Message { source: Endpoint, message: Message },
    Exit { source: Endpoint },
}

/// What a mailbox hands to its endpoint loop
#[derive(Debug)]
pub enum Incoming {
    Message { source: Endpoint, message: Message },
    /// Shutdown; the loop must stop after seeing this
    Exit,
}

/// Collects routing edges before the threads start
#[derive(Default)]
pub struct RouterBuilder {
    edges: HashMap<(Endpoint, Tag), Vec<Endpoint>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one routing edge
    pub fn connect(
        &mut self,
        source: Endpoint,
        tag: Tag,
        destination: Endpoint,
    ) -> Result<&mut Self, RouterError> {
        let targets = self.edges.entry((source, tag)).or_default();
        if tag != Tag::Exit {
            if let Some(&existing) = targets.first() {
                return Err(RouterError::AlreadyConnected {
                    from: source,
                    tag,
                    existing,
                });
            }
        }
        if !targets.contains(&destination) {
            targets.push(destination);
        }
        Ok(self)
    }

    /// Create one queue per endpoint and bind the edges to them
    pub fn build(self) -> Router {
        let mut senders = HashMap::new();
        let mut mailboxes = HashMap::new();
        for endpoint in Endpoint::ALL {
            let (tx, rx) = channel::unbounded();
            senders.insert(endpoint, tx);
            mailboxes.insert(endpoint, Mailbox { endpoint, rx });
        }

        let mut routes: HashMap<Endpoint, HashMap<Tag, Vec<Sender<Envelope>>>> = HashMap::new();
        for ((source, tag), destinations) in self.edges {
            let bound = destinations
                .iter()
                .filter_map(|d| senders.get(d).cloned())
                .collect();
            routes.entry(source).or_default().insert(tag, bound);
        }

        let outboxes = Endpoint::ALL
            .into_iter()
            .map(|endpoint| {
                let table = routes.remove(&endpoint).unwrap_or_default();
                (
                    endpoint,
                    Outbox {
                        source: endpoint,
                        routes: Arc::new(table),
                    },
                )
            })
            .collect();

        log::debug!("[ITC] Router built with {} endpoints", Endpoint::ALL.len());
        Router {
            outboxes,
            mailboxes,
        }
    }
}

/// Built wiring, from which endpoints take their halves
pub struct Router {
    outboxes: HashMap<Endpoint, Outbox>,
    mailboxes: HashMap<Endpoint, Mailbox>,
}

impl Router {
    /// Sending half of an endpoint (cheap to clone)
    pub fn outbox(&self, endpoint: Endpoint) -> Outbox {
        self.outboxes
            .get(&endpoint)
            .cloned()
            .unwrap_or_else(|| Outbox {
                source: endpoint,
                routes: Arc::new(HashMap::new()),
            })
    }

    /// Receiving half of an endpoint; can be taken once
    pub fn take_mailbox(&mut self, endpoint: Endpoint) -> Option<Mailbox> {
        self.mailboxes.remove(&endpoint)
    }
}

/// Sending half bound to one source endpoint
#[derive(Clone)]
pub struct Outbox {
    source: Endpoint,
    routes: Arc<HashMap<Tag, Vec<Sender<Envelope>>>>,
}

impl Outbox {
    pub fn source(&self) -> Endpoint {
        self.source
    }

    /// Queue a message for the single destination of `tag`
    ///
    /// Never blocks. On error the message is dropped.
    pub fn send(&self, tag: Tag, message: Message) -> Result<(), RouterError> {
        if tag == Tag::Exit {
            return Err(RouterError::ExitIsBroadcast);
        }
        let sender = self
            .routes
            .get(&tag)
            .and_then(|targets| targets.first())
            .ok_or(RouterError::NoRoute {
                from: self.source,
                tag,
            })?;
        sender
            .send(Envelope::Message {
                source: self.source,
                message,
            })
            .map_err(|_| RouterError::Disconnected(self.source))
    }

    /// Like [`Outbox::send`] but logs failures instead of returning them
    pub fn post(&self, tag: Tag, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.send(tag, message) {
            log::warn!("[ITC] Dropped {} message from {}: {}", kind, self.source, e);
        }
    }

    /// Send EXIT to every destination wired for it
    ///
    /// Returns the number of endpoints reached.
    pub fn broadcast_exit(&self) -> usize {
        let Some(targets) = self.routes.get(&Tag::Exit) else {
            return 0;
        };
        targets
            .iter()
            .filter(|tx| {
                tx.send(Envelope::Exit {
                    source: self.source,
                })
                .is_ok()
            })
            .count()
    }
}

/// Receiving half of one endpoint
pub struct Mailbox {
    endpoint: Endpoint,
    rx: Receiver<Envelope>,
}

impl Mailbox {
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    fn open(envelope: Envelope) -> Incoming {
        match envelope {
            Envelope::Message { source, message } => Incoming::Message { source, message },
            Envelope::Exit { source } => {
                log::debug!("[ITC] Exit from {}", source);
                Incoming::Exit
            }
        }
    }

    /// Block until something arrives
    ///
    /// A router with no senders left reads as [`Incoming::Exit`].
    pub fn recv(&self) -> Incoming {
        self.rx.recv().map(Self::open).unwrap_or(Incoming::Exit)
    }

    /// Block for at most `timeout`; `None` when nothing arrived
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Incoming> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => Some(Self::open(envelope)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Incoming::Exit),
        }
    }

    pub fn try_recv(&self) -> Option<Incoming> {
        match self.rx.try_recv() {
            Ok(envelope) => Some(Self::open(envelope)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Incoming::Exit),
        }
    }

    /// Drop everything still queued, called once a loop has seen EXIT
    pub fn discard_pending(&self) -> usize {
        let mut dropped = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            if let Envelope::Message { message, .. } = envelope {
                log::debug!(
                    "[ITC] {} discarding {} after exit",
                    self.endpoint,
                    message.kind()
                );
                dropped += 1;
            }
        }
        dropped
    }
}
