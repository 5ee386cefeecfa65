//! Mock EventBus for testing.
//!
//! Records every accepted message in send order. Failures can be injected
//! for all sends, for the next N sends, or for specific entity ids.

use cart_cdc::error::{BoxFuture, CdcError};
use cart_cdc::{BusMessage, ChangeEvent, EventBus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct RecordingBus {
    destination: String,
    accepted: Mutex<Vec<BusMessage>>,
    /// Every send() call, accepted or not.
    calls: AtomicUsize,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
    fail_entities: Mutex<HashSet<String>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self {
            destination: "carts-events".to_string(),
            accepted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_all: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            fail_entities: Mutex::new(HashSet::new()),
        }
    }

    /// A bus that rejects every send until `set_failing(false)`.
    pub fn failing() -> Self {
        let bus = Self::new();
        bus.set_failing(true);
        bus
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` sends, then accept again.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Always fail sends for this entity id.
    pub fn fail_entity(&self, entity_id: &str) {
        self.fail_entities.lock().unwrap().insert(entity_id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<BusMessage> {
        self.accepted.lock().unwrap().clone()
    }

    /// Accepted messages decoded back into envelopes.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.messages()
            .iter()
            .map(|m| serde_json::from_str(&m.data).unwrap())
            .collect()
    }

    pub fn clear(&self) {
        self.accepted.lock().unwrap().clear();
    }

    fn should_fail(&self, message: &BusMessage) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return true;
        }
        let entity = message.attribute("entity_id").unwrap_or_default();
        self.fail_entities.lock().unwrap().contains(entity)
    }
}

impl EventBus for RecordingBus {
    fn send<'a>(&'a self, message: &'a BusMessage) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.should_fail(message) {
                return Err(CdcError::bus_msg("XADD", "injected failure"));
            }
            self.accepted.lock().unwrap().push(message.clone());
            Ok(format!("0-{}", n))
        })
    }

    fn destination(&self) -> &str {
        &self.destination
    }
}
