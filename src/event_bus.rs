//! Fan-out publish/subscribe with presentation-thread affinity.
//!
//! [`EventBus`] is owned by the presentation (UI) thread and is deliberately
//! `!Send`: handlers are only ever invoked on that thread. Background work
//! publishes through an [`EventPublisher`], which marshals events onto a
//! channel that the UI loop drains with [`EventBus::pump`].
//!
//! A publish that happens while the bus is already delivering (a handler
//! moving the pagination engine, say) is queued and delivered after the
//! current event has reached every subscriber, so handlers never re-enter.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use eyre::{Result, eyre};

use crate::events::{
    Event, EventPayload, PaginationHandler, ReadingLifecycleHandler, SettingsHandler,
};
use crate::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// The capabilities one subscriber registers. Families left unset are
/// never delivered to it.
pub struct Subscription {
    name: String,
    reading: Option<Rc<RefCell<dyn ReadingLifecycleHandler>>>,
    pagination: Option<Rc<RefCell<dyn PaginationHandler>>>,
    settings: Option<Rc<RefCell<dyn SettingsHandler>>>,
}

impl Subscription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reading: None,
            pagination: None,
            settings: None,
        }
    }

    pub fn reading(mut self, handler: Rc<RefCell<dyn ReadingLifecycleHandler>>) -> Self {
        self.reading = Some(handler);
        self
    }

    pub fn pagination(mut self, handler: Rc<RefCell<dyn PaginationHandler>>) -> Self {
        self.pagination = Some(handler);
        self
    }

    pub fn settings(mut self, handler: Rc<RefCell<dyn SettingsHandler>>) -> Self {
        self.settings = Some(handler);
        self
    }
}

#[derive(Clone)]
struct Registration {
    id: SubscriberId,
    name: Rc<str>,
    reading: Option<Rc<RefCell<dyn ReadingLifecycleHandler>>>,
    pagination: Option<Rc<RefCell<dyn PaginationHandler>>>,
    settings: Option<Rc<RefCell<dyn SettingsHandler>>>,
}

struct BusInner {
    subscribers: RefCell<Vec<Registration>>,
    next_id: Cell<u64>,
    pending: RefCell<VecDeque<(Event, Vec<Registration>)>>,
    delivering: Cell<bool>,
    sender: Sender<Event>,
    receiver: Receiver<Event>,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Rc<BusInner>,
}

/// Thread-safe publishing handle. Events sent through it are delivered on
/// the thread that owns the bus, the next time it pumps.
#[derive(Clone, Debug)]
pub struct EventPublisher {
    sender: Sender<Event>,
}

impl EventPublisher {
    pub fn publish(&self, payload: impl Into<EventPayload>) {
        self.publish_event(Event::new(payload));
    }

    pub fn publish_event(&self, event: Event) {
        if self.sender.send(event).is_err() {
            logging::debug("Event bus is gone; dropping event");
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            inner: Rc::new(BusInner {
                subscribers: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                pending: RefCell::new(VecDeque::new()),
                delivering: Cell::new(false),
                sender,
                receiver,
            }),
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            sender: self.inner.sender.clone(),
        }
    }

    pub fn subscribe(&self, subscription: Subscription) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        logging::debug(format!(
            "Subscriber '{}' registered (reading={}, pagination={}, settings={})",
            subscription.name,
            subscription.reading.is_some(),
            subscription.pagination.is_some(),
            subscription.settings.is_some(),
        ));
        self.inner.subscribers.borrow_mut().push(Registration {
            id,
            name: Rc::from(subscription.name),
            reading: subscription.reading,
            pagination: subscription.pagination,
            settings: subscription.settings,
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|registration| registration.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Deliver to every subscriber registered right now.
    pub fn publish(&self, payload: impl Into<EventPayload>) {
        self.publish_event(Event::new(payload));
    }

    pub fn publish_event(&self, event: Event) {
        let targets = self.inner.subscribers.borrow().clone();
        self.inner.pending.borrow_mut().push_back((event, targets));
        self.drain_pending();
    }

    /// Deliver everything marshaled from other threads. Returns how many
    /// events were delivered.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.inner.receiver.try_recv() {
            self.publish_event(event);
            delivered += 1;
        }
        delivered
    }

    /// Like [`pump`](Self::pump), but waits up to `timeout` for the first
    /// event to arrive.
    pub fn pump_timeout(&self, timeout: Duration) -> usize {
        match self.inner.receiver.recv_timeout(timeout) {
            Ok(event) => {
                self.publish_event(event);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn drain_pending(&self) {
        if self.inner.delivering.replace(true) {
            return;
        }
        loop {
            let next = self.inner.pending.borrow_mut().pop_front();
            let Some((event, targets)) = next else {
                break;
            };
            deliver(&event, &targets);
        }
        self.inner.delivering.set(false);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(event: &Event, targets: &[Registration]) {
    for registration in targets {
        let outcome = match &event.payload {
            EventPayload::Reading(payload) => registration
                .reading
                .as_ref()
                .map(|handler| invoke(handler, |h| h.on_reading_event(payload))),
            EventPayload::Pagination(payload) => registration
                .pagination
                .as_ref()
                .map(|handler| invoke(handler, |h| h.on_pagination_event(payload))),
            EventPayload::Settings(payload) => registration
                .settings
                .as_ref()
                .map(|handler| invoke(handler, |h| h.on_settings_changed(payload))),
        };
        if let Some(Err(err)) = outcome {
            logging::warn(format!(
                "Subscriber '{}' failed on {:?} event {}: {}",
                registration.name,
                event.family(),
                event.id,
                err
            ));
        }
    }
}

// One failing or panicking subscriber must not starve the rest.
fn invoke<H: ?Sized>(
    handler: &Rc<RefCell<H>>,
    call: impl FnOnce(&mut H) -> Result<()>,
) -> Result<()> {
    let mut guard = handler
        .try_borrow_mut()
        .map_err(|_| eyre!("handler is already borrowed"))?;
    match panic::catch_unwind(AssertUnwindSafe(|| call(&mut *guard))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(eyre!("handler panicked: {}", message))
        }
    }
}
