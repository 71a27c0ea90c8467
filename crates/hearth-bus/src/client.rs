use std::thread;

use hearth_sched::ExponentialBackoff;
use log::{debug, info, warn};

use crate::topic::topic_matches;
use crate::transport::{BusTransport, SessionOptions, Will};
use crate::BusError;

pub type MessageHandler<C> = Box<dyn FnMut(&str, &[u8], &mut C) -> Result<(), BusError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Presence payloads published retained on the status topic. The broker
/// publishes `offline` for us via the last will if the session dies.
const ONLINE: &[u8] = b"online";
const OFFLINE: &[u8] = b"offline";

/// Bus session owner. Records desired subscriptions independently of session
/// state and replays them on every (re)connect, so a broker restart never
/// silently loses a subscription.
pub struct BusClient<C> {
    transport: Box<dyn BusTransport>,
    options: SessionOptions,
    status_topic: String,
    state: SessionState,
    subscriptions: Vec<String>,
    handlers: Vec<(String, MessageHandler<C>)>,
    catch_all: Option<MessageHandler<C>>,
    backoff: ExponentialBackoff,
}

impl<C> BusClient<C> {
    pub fn new(
        transport: Box<dyn BusTransport>,
        mut options: SessionOptions,
        status_topic: &str,
        backoff: ExponentialBackoff,
    ) -> Self {
        options.will = Some(Will {
            topic: status_topic.to_owned(),
            payload: OFFLINE.to_vec(),
            retain: true,
        });
        Self {
            transport,
            options,
            status_topic: status_topic.to_owned(),
            state: SessionState::Disconnected,
            subscriptions: Vec::new(),
            handlers: Vec::new(),
            catch_all: None,
            backoff,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.transport.is_open()
    }

    /// Open the session, announce presence, and replay subscriptions.
    /// Idempotent: returns immediately when already connected.
    pub fn connect(&mut self) -> Result<(), BusError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.options.host.is_empty() {
            return Err(BusError::Transport("no broker address".to_owned()));
        }

        if let Err(err) = self.transport.open(&self.options) {
            warn!("bus: session open failed: {err}");
            self.state = SessionState::Disconnected;
            return Err(err);
        }

        // Presence first, then subscriptions; a failure anywhere tears the
        // whole session down rather than leaving it half-initialized.
        let result = self.announce_and_resubscribe();
        match result {
            Ok(()) => {
                info!(
                    "bus: connected to {}:{} as '{}'",
                    self.options.host, self.options.port, self.options.client_id
                );
                self.state = SessionState::Connected;
                self.backoff.reset();
                Ok(())
            }
            Err(err) => {
                warn!("bus: session setup failed: {err}");
                self.transport.close();
                self.state = SessionState::Disconnected;
                Err(err)
            }
        }
    }

    fn announce_and_resubscribe(&mut self) -> Result<(), BusError> {
        self.transport.publish(&self.status_topic, ONLINE, true)?;
        for filter in &self.subscriptions {
            debug!("bus: resubscribing to '{filter}'");
            self.transport.subscribe(filter)?;
        }
        Ok(())
    }

    /// Publish a clean-offline presence and close the session.
    pub fn disconnect(&mut self) {
        if self.transport.is_open() {
            // Best effort: the will covers us if this publish is lost.
            if let Err(err) = self.transport.publish(&self.status_topic, OFFLINE, true) {
                debug!("bus: offline publish on disconnect failed: {err}");
            }
            self.transport.close();
            info!("bus: disconnected");
        }
        self.state = SessionState::Disconnected;
    }

    /// Sleep out the current backoff step, then attempt to connect. The
    /// backoff only resets on a successful connect, so repeated failures
    /// keep stretching the delay.
    pub fn reconnect(&mut self) -> Result<(), BusError> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = SessionState::Reconnecting;
        let delay = self.backoff.next();
        info!(
            "bus: reconnect attempt {} in {:.1}s",
            self.backoff.attempt(),
            delay.as_secs_f64()
        );
        thread::sleep(delay);
        self.connect()
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BusError> {
        if self.state != SessionState::Connected {
            debug!("bus: publish to '{topic}' skipped, not connected");
            return Err(BusError::NotConnected);
        }
        if let Err(err) = self.transport.publish(topic, payload, retain) {
            warn!("bus: publish to '{topic}' failed: {err}");
            self.drop_session();
            return Err(err);
        }
        Ok(())
    }

    /// Register a handler for a topic filter. The subscription is recorded
    /// regardless of session state and replayed on every connect; when a
    /// session is live it is also sent to the broker immediately.
    pub fn subscribe<F>(&mut self, filter: &str, handler: F) -> Result<(), BusError>
    where
        F: FnMut(&str, &[u8], &mut C) -> Result<(), BusError> + 'static,
    {
        if !self.subscriptions.iter().any(|f| f == filter) {
            self.subscriptions.push(filter.to_owned());
        }
        self.handlers.push((filter.to_owned(), Box::new(handler)));

        if self.state == SessionState::Connected {
            if let Err(err) = self.transport.subscribe(filter) {
                warn!("bus: subscribe to '{filter}' failed: {err}");
                self.drop_session();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Handler invoked for every inbound message, after any matching
    /// filter handlers have run.
    pub fn set_catch_all<F>(&mut self, handler: F)
    where
        F: FnMut(&str, &[u8], &mut C) -> Result<(), BusError> + 'static,
    {
        self.catch_all = Some(Box::new(handler));
    }

    /// Drain pending inbound messages, dispatching each to every matching
    /// handler in registration order and then to the catch-all, if one is
    /// set. Handler errors are logged and do not affect the session;
    /// transport errors drop it. Returns the number of messages processed.
    pub fn check_msg(&mut self, ctx: &mut C) -> Result<usize, BusError> {
        if self.state != SessionState::Connected {
            return Ok(0);
        }

        let mut processed = 0;
        loop {
            let message = match self.transport.receive() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    warn!("bus: receive failed: {err}");
                    self.drop_session();
                    return Err(err);
                }
            };

            let mut matched = false;
            for (filter, handler) in &mut self.handlers {
                if topic_matches(filter, &message.topic) {
                    matched = true;
                    if let Err(err) = handler(&message.topic, &message.payload, ctx) {
                        warn!("bus: handler for '{filter}' failed on '{}': {err}", message.topic);
                    }
                }
            }
            if !matched && self.catch_all.is_none() {
                debug!("bus: no handler for '{}'", message.topic);
            }
            if let Some(handler) = &mut self.catch_all {
                if let Err(err) = handler(&message.topic, &message.payload, ctx) {
                    warn!("bus: catch-all handler failed on '{}': {err}", message.topic);
                }
            }
            processed += 1;
        }
        Ok(processed)
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    fn drop_session(&mut self) {
        self.transport.close();
        self.state = SessionState::Disconnected;
    }
}
