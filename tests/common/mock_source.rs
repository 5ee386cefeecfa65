//! Scripted CartSource for testing.
//!
//! Each fetch() pops the next scripted response. Once the script runs out,
//! the last body is repeated, so a single `set()` behaves like a static
//! collection. Queued outages are one-shot.

use cart_cdc::entity::parse_entities;
use cart_cdc::error::{BoxFuture, CdcError};
use cart_cdc::{CartSource, RawEntity};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Response {
    Body(Value),
    Unavailable(String),
}

pub struct ScriptedSource {
    script: Mutex<VecDeque<Response>>,
    last: Mutex<Response>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    /// A source that always returns `body`.
    pub fn new(body: Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Response::Body(body)),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Replace the collection returned from now on.
    pub fn set(&self, body: Value) {
        self.script.lock().unwrap().clear();
        *self.last.lock().unwrap() = Response::Body(body);
    }

    /// Queue a body for the next fetch.
    pub fn push(&self, body: Value) {
        self.script.lock().unwrap().push_back(Response::Body(body));
    }

    /// Queue an outage for the next fetch.
    pub fn push_unavailable(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Response::Unavailable(message.to_string()));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn next(&self) -> Response {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(response) => {
                if let Response::Body(_) = &response {
                    *self.last.lock().unwrap() = response.clone();
                }
                response
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

impl CartSource for ScriptedSource {
    fn fetch(&self) -> BoxFuture<'_, Vec<RawEntity>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let response = self.next();
        Box::pin(async move {
            match response {
                Response::Body(body) => parse_entities(body),
                Response::Unavailable(message) => Err(CdcError::SourceUnavailable {
                    attempts: 1,
                    message,
                }),
            }
        })
    }

    fn describe(&self) -> &str {
        "scripted"
    }
}
