//! One protocol engine per destination, driven by a single actor task.
//!
//! The actor owns every [`Channel`](crate::channel) and processes commands,
//! slot changes, handler results and deadlines one at a time, so channels
//! never need locks. A watcher task per destination forwards slot changes;
//! handlers run on their own tasks and report back through the same queue.
//! Destinations are created lazily on first use and torn down explicitly.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use slotwire_transport::{SlotLink, SlotWatcher, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Inbound};
use crate::dispatch::{Handler, HandlerRegistry, RequestContext};
use crate::error::{PeerError, Result};
use crate::ids::{IdGenerator, UuidIds};
use crate::peer::{Peer, PeerConfig};

/// Name of a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DestinationId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Resolves a destination to the slot pair that reaches it.
///
/// Called once per destination, when it is first used.
pub trait LinkRegistry: Send + Sync + 'static {
    fn resolve(&self, destination: &DestinationId) -> slotwire_transport::Result<SlotLink>;
}

impl<F> LinkRegistry for F
where
    F: Fn(&DestinationId) -> slotwire_transport::Result<SlotLink> + Send + Sync + 'static,
{
    fn resolve(&self, destination: &DestinationId) -> slotwire_transport::Result<SlotLink> {
        self(destination)
    }
}

/// Fixed set of pre-built links. Each link can be resolved once.
#[derive(Default)]
pub struct LinkTable {
    links: Mutex<HashMap<DestinationId, SlotLink>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, destination: impl Into<DestinationId>, link: SlotLink) -> Self {
        self.insert(destination, link);
        self
    }

    pub fn insert(&self, destination: impl Into<DestinationId>, link: SlotLink) {
        match self.links.lock() {
            Ok(mut links) => links.insert(destination.into(), link),
            Err(poisoned) => poisoned.into_inner().insert(destination.into(), link),
        };
    }
}

impl LinkRegistry for LinkTable {
    fn resolve(&self, destination: &DestinationId) -> slotwire_transport::Result<SlotLink> {
        let link = match self.links.lock() {
            Ok(mut links) => links.remove(destination),
            Err(poisoned) => poisoned.into_inner().remove(destination),
        };
        link.ok_or_else(|| TransportError::UnknownDestination(destination.to_string()))
    }
}

/// Callback for inbound failures that have no caller to report to.
pub type FailureHook = Arc<dyn Fn(&DestinationId, &PeerError) + Send + Sync>;

enum Command {
    Send {
        destination: DestinationId,
        message: Value,
        responder: oneshot::Sender<Result<Value>>,
    },
    Attach {
        destination: DestinationId,
        done: oneshot::Sender<Result<()>>,
    },
    Teardown {
        destination: DestinationId,
        done: oneshot::Sender<bool>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

enum Event {
    Signal {
        destination: DestinationId,
        generation: u64,
        value: String,
    },
    SlotClosed {
        destination: DestinationId,
        generation: u64,
    },
    HandlerDone {
        destination: DestinationId,
        generation: u64,
        request_id: String,
        response: Option<Value>,
    },
}

/// Configures and starts a multiplexer.
pub struct MultiplexerBuilder {
    config: PeerConfig,
    handlers: HandlerRegistry,
    ids: Arc<dyn IdGenerator>,
    on_failure: Option<FailureHook>,
}

impl Default for MultiplexerBuilder {
    fn default() -> Self {
        Self::new(PeerConfig::default())
    }
}

impl MultiplexerBuilder {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
            ids: Arc::new(UuidIds),
            on_failure: None,
        }
    }

    /// Register a handler for inbound requests from any destination.
    pub fn on_message(mut self, handler: impl Handler) -> Self {
        self.handlers.register(handler);
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Observe malformed or inconsistent inbound messages.
    pub fn on_failure(
        mut self,
        hook: impl Fn(&DestinationId, &PeerError) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Start the actor task. Must be called from within a tokio runtime.
    pub fn spawn(self, registry: impl LinkRegistry) -> Result<MultiplexerHandle> {
        self.config.handshake.validate()?;

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let multiplexer = Multiplexer {
            config: self.config,
            registry: Arc::new(registry),
            handlers: Arc::new(self.handlers),
            ids: self.ids,
            on_failure: self.on_failure,
            destinations: HashMap::new(),
            next_generation: 0,
            commands,
            events,
            events_tx,
        };
        tokio::spawn(multiplexer.run());

        Ok(MultiplexerHandle {
            commands: commands_tx,
        })
    }

    /// Start a multiplexer with a single destination and attach to it.
    pub async fn connect(self, link: SlotLink) -> Result<Peer> {
        let destination = DestinationId::from(crate::peer::PEER_DESTINATION);
        let handle = self.spawn(LinkTable::new().with(destination.clone(), link))?;
        handle.attach(destination.clone()).await?;
        Ok(Peer::new(handle, destination))
    }
}

/// Cloneable handle to a running multiplexer.
///
/// The actor stops when [`MultiplexerHandle::shutdown`] is called or the
/// last handle is dropped; either way every pending request is cancelled.
#[derive(Clone)]
pub struct MultiplexerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl MultiplexerHandle {
    /// Send a request and wait for its response.
    pub async fn send(&self, destination: impl Into<DestinationId>, message: Value) -> Result<Value> {
        let (responder, rx) = oneshot::channel();
        self.command(Command::Send {
            destination: destination.into(),
            message,
            responder,
        })?;
        rx.await.map_err(|_| stopped())?
    }

    /// Typed wrapper around [`MultiplexerHandle::send`].
    pub async fn request<T, R>(&self, destination: impl Into<DestinationId>, request: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let message = serde_json::to_value(request)?;
        let response = self.send(destination, message).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Create the destination now instead of on first send.
    ///
    /// An initiator writes its INIT frame at this point.
    pub async fn attach(&self, destination: impl Into<DestinationId>) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Attach {
            destination: destination.into(),
            done,
        })?;
        rx.await.map_err(|_| stopped())?
    }

    /// Drop a destination, cancelling its pending requests.
    ///
    /// Returns `false` if the destination was not attached.
    pub async fn teardown(&self, destination: impl Into<DestinationId>) -> Result<bool> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Teardown {
            destination: destination.into(),
            done,
        })?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the actor, cancelling everything pending on every destination.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Shutdown { done })?;
        rx.await.map_err(|_| stopped())
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

impl fmt::Debug for MultiplexerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexerHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

fn stopped() -> PeerError {
    PeerError::Disconnected("multiplexer stopped".to_string())
}

struct Destination {
    channel: Channel,
    generation: u64,
    watcher: JoinHandle<()>,
}

struct Multiplexer {
    config: PeerConfig,
    registry: Arc<dyn LinkRegistry>,
    handlers: Arc<HandlerRegistry>,
    ids: Arc<dyn IdGenerator>,
    on_failure: Option<FailureHook>,
    destinations: HashMap<DestinationId, Destination>,
    next_generation: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    events_tx: mpsc::UnboundedSender<Event>,
}

impl Multiplexer {
    async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command) {
                            return;
                        }
                    }
                    None => break,
                },
                Some(event) = self.events.recv() => self.on_event(event),
                () = sleep_until(deadline) => self.on_tick(Instant::now()),
            }
        }
        self.close_all("all handles dropped");
    }

    /// Returns `false` once the actor should stop.
    fn on_command(&mut self, command: Command) -> bool {
        let now = Instant::now();
        match command {
            Command::Send {
                destination,
                message,
                responder,
            } => {
                if let Err(err) = self.ensure(&destination, now) {
                    let _ = responder.send(Err(err));
                    return true;
                }
                if let Some(entry) = self.destinations.get_mut(&destination) {
                    entry.channel.enqueue(message, responder, now);
                }
            }
            Command::Attach { destination, done } => {
                let _ = done.send(self.ensure(&destination, now));
            }
            Command::Teardown { destination, done } => {
                let _ = done.send(self.teardown(&destination, "destination torn down"));
            }
            Command::Shutdown { done } => {
                self.close_all("multiplexer shut down");
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn on_event(&mut self, event: Event) {
        let now = Instant::now();
        match event {
            Event::Signal {
                destination,
                generation,
                value,
            } => {
                let Some(entry) = self.current(&destination, generation) else {
                    return;
                };
                let inbound = entry.channel.on_signal(&value, now);
                self.process(&destination, generation, inbound);
            }
            Event::SlotClosed {
                destination,
                generation,
            } => {
                if self.current(&destination, generation).is_some() {
                    warn!(destination = %destination, "inbound slot closed");
                    self.teardown(&destination, "slot closed");
                }
            }
            Event::HandlerDone {
                destination,
                generation,
                request_id,
                response,
            } => {
                let Some(response) = response else {
                    debug!(destination = %destination, id = %request_id, "no handler answered");
                    return;
                };
                let Some(entry) = self.current(&destination, generation) else {
                    return;
                };
                if let Err(err) = entry.channel.respond(&request_id, response, now) {
                    warn!(destination = %destination, id = %request_id, error = %err, "could not send response");
                    self.report(&destination, &err);
                }
            }
        }
    }

    fn on_tick(&mut self, now: Instant) {
        for entry in self.destinations.values_mut() {
            entry.channel.on_tick(now);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.destinations
            .values()
            .filter_map(|entry| entry.channel.next_deadline())
            .min()
    }

    fn current(&mut self, destination: &DestinationId, generation: u64) -> Option<&mut Destination> {
        self.destinations
            .get_mut(destination)
            .filter(|entry| entry.generation == generation)
    }

    /// Create the destination's channel if it does not exist yet.
    fn ensure(&mut self, destination: &DestinationId, now: Instant) -> Result<()> {
        if self.destinations.contains_key(destination) {
            return Ok(());
        }

        let SlotLink { writer, mut watcher } = self.registry.resolve(destination)?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let mut channel = Channel::new(
            destination.clone(),
            writer,
            self.config.clone(),
            Arc::clone(&self.ids),
        );
        channel.start(now)?;
        let initial = watcher.take_current();
        let inbound = channel.on_signal(&initial, now);

        let task = spawn_watcher(
            destination.clone(),
            generation,
            watcher,
            self.events_tx.clone(),
        );
        self.destinations.insert(
            destination.clone(),
            Destination {
                channel,
                generation,
                watcher: task,
            },
        );
        info!(destination = %destination, "destination attached");

        self.process(destination, generation, inbound);
        Ok(())
    }

    fn process(&self, destination: &DestinationId, generation: u64, inbound: Inbound) {
        for err in &inbound.failures {
            self.report(destination, err);
        }
        for request in inbound.requests {
            let handlers = Arc::clone(&self.handlers);
            let events = self.events_tx.clone();
            let destination = destination.clone();
            tokio::spawn(async move {
                let ctx = RequestContext::new(destination.clone(), request.id.clone());
                let response = handlers.dispatch(request.message, ctx).await;
                let _ = events.send(Event::HandlerDone {
                    destination,
                    generation,
                    request_id: request.id,
                    response,
                });
            });
        }
    }

    fn report(&self, destination: &DestinationId, err: &PeerError) {
        if let Some(hook) = &self.on_failure {
            hook(destination, err);
        }
    }

    fn teardown(&mut self, destination: &DestinationId, reason: &str) -> bool {
        let Some(mut entry) = self.destinations.remove(destination) else {
            return false;
        };
        entry.watcher.abort();
        let pending = entry.channel.pending();
        entry.channel.teardown(reason);
        info!(destination = %destination, pending, reason, "destination torn down");
        true
    }

    fn close_all(&mut self, reason: &str) {
        let destinations: Vec<DestinationId> = self.destinations.keys().cloned().collect();
        for destination in destinations {
            self.teardown(&destination, reason);
        }
    }
}

fn spawn_watcher(
    destination: DestinationId,
    generation: u64,
    mut watcher: SlotWatcher,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match watcher.changed().await {
                Ok(value) => {
                    let event = Event::Signal {
                        destination: destination.clone(),
                        generation,
                        value,
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Err(_) => {
                    let _ = events.send(Event::SlotClosed {
                        destination,
                        generation,
                    });
                    return;
                }
            }
        }
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
