use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::BusError;

/// Message published on behalf of the client by the broker if the session
/// dies without a clean close.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Everything the transport needs to open a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub will: Option<Will>,
}

/// A message delivered from the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Seam to the wire protocol. One session at a time; `open` on an already
/// open transport is a caller bug the implementation may reject.
pub trait BusTransport {
    fn open(&mut self, options: &SessionOptions) -> Result<(), BusError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BusError>;
    fn subscribe(&mut self, filter: &str) -> Result<(), BusError>;
    /// Non-blocking: the next buffered inbound message, if any.
    fn receive(&mut self) -> Result<Option<InboundMessage>, BusError>;
}

/// A publish as the fake broker saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

struct Inner {
    open: bool,
    open_count: u32,
    last_options: Option<SessionOptions>,
    published: Vec<PublishRecord>,
    subscriptions: Vec<String>,
    inbound: VecDeque<InboundMessage>,
    fail_opens_remaining: u32,
    fail_publishes: bool,
    fail_receives: bool,
}

/// In-memory broker session for tests. Clones share state, so a test keeps
/// one handle for fault injection and inspection while the client owns
/// another.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Rc<RefCell<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                open: false,
                open_count: 0,
                last_options: None,
                published: Vec::new(),
                subscriptions: Vec::new(),
                inbound: VecDeque::new(),
                fail_opens_remaining: 0,
                fail_publishes: false,
                fail_receives: false,
            })),
        }
    }

    /// Make the next `count` calls to `open` fail before succeeding.
    pub fn fail_next_opens(&self, count: u32) {
        self.inner.borrow_mut().fail_opens_remaining = count;
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.inner.borrow_mut().fail_publishes = fail;
    }

    pub fn set_fail_receives(&self, fail: bool) {
        self.inner.borrow_mut().fail_receives = fail;
    }

    /// Queue a message for the client to pick up on its next poll.
    pub fn push_inbound(&self, topic: &str, payload: &[u8]) {
        self.inner.borrow_mut().inbound.push_back(InboundMessage {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        });
    }

    /// Simulate the broker dropping the session out from under the client.
    pub fn drop_session(&self) {
        self.inner.borrow_mut().open = false;
    }

    pub fn open_count(&self) -> u32 {
        self.inner.borrow().open_count
    }

    pub fn last_options(&self) -> Option<SessionOptions> {
        self.inner.borrow().last_options.clone()
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.inner.borrow().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.borrow().subscriptions.clone()
    }

    pub fn clear_published(&self) {
        self.inner.borrow_mut().published.clear();
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransport for MemoryTransport {
    fn open(&mut self, options: &SessionOptions) -> Result<(), BusError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_opens_remaining > 0 {
            inner.fail_opens_remaining -= 1;
            return Err(BusError::Transport("broker unreachable".to_owned()));
        }
        inner.open = true;
        inner.open_count += 1;
        inner.last_options = Some(options.clone());
        // A fresh session starts with no server-side subscription state.
        inner.subscriptions.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.inner.borrow_mut().open = false;
    }

    fn is_open(&self) -> bool {
        self.inner.borrow().open
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BusError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(BusError::NotConnected);
        }
        if inner.fail_publishes {
            return Err(BusError::Transport("publish failed".to_owned()));
        }
        inner.published.push(PublishRecord {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), BusError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(BusError::NotConnected);
        }
        inner.subscriptions.push(filter.to_owned());
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<InboundMessage>, BusError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open {
            return Err(BusError::NotConnected);
        }
        if inner.fail_receives {
            return Err(BusError::Transport("connection reset".to_owned()));
        }
        Ok(inner.inbound.pop_front())
    }
}
