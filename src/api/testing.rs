//! In-memory [`Network`] double used by unit and integration tests.

use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value, json};

use crate::api::{HttpRequest, Network, Verb};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FakeFailure {
    Status(u16),
    Timeout,
    Connection,
}

impl FakeFailure {
    fn to_error(self) -> Error {
        match self {
            Self::Status(status) => Error::RequestFailed { status },
            Self::Timeout => Error::Timeout,
            Self::Connection => Error::Connection("fake network is down".to_string()),
        }
    }
}

type Scripted = std::result::Result<Option<Value>, FakeFailure>;

/// Scripted responses are consumed in FIFO order per `(verb, uri)`. Unscripted
/// calls succeed: DELETE with no body, everything else with `{}`.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    scripted: HashMap<(Verb, String), VecDeque<Scripted>>,
    sent: Vec<HttpRequest>,
    down_after: Option<usize>,
}

impl FakeNetwork {
    pub fn respond(&mut self, verb: Verb, uri: &str, body: Value) {
        self.script(verb, uri, Ok(Some(body)));
    }

    pub fn respond_empty(&mut self, verb: Verb, uri: &str) {
        self.script(verb, uri, Ok(None));
    }

    pub fn fail(&mut self, verb: Verb, uri: &str, failure: FakeFailure) {
        self.script(verb, uri, Err(failure));
    }

    /// Every call after the first `calls` fails with a connection error.
    pub fn go_down_after(&mut self, calls: usize) {
        self.down_after = Some(calls);
    }

    pub fn restore(&mut self) {
        self.down_after = None;
    }

    pub fn sent(&self) -> &[HttpRequest] {
        &self.sent
    }

    /// Bodies of every POST to `uri`, in send order.
    pub fn posted(&self, uri: &str) -> Vec<&Map<String, Value>> {
        self.sent
            .iter()
            .filter(|request| request.verb == Verb::Post && request.uri == uri)
            .filter_map(|request| request.payload.as_ref())
            .collect()
    }

    fn script(&mut self, verb: Verb, uri: &str, outcome: Scripted) {
        self.scripted
            .entry((verb, uri.to_string()))
            .or_default()
            .push_back(outcome);
    }
}

impl Network for FakeNetwork {
    fn invoke(&mut self, request: &HttpRequest) -> Result<Option<Value>> {
        self.sent.push(request.clone());
        if let Some(limit) = self.down_after
            && self.sent.len() > limit
        {
            return Err(FakeFailure::Connection.to_error());
        }

        let scripted = self
            .scripted
            .get_mut(&(request.verb, request.uri.clone()))
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Ok(body)) => Ok(body),
            Some(Err(failure)) => Err(failure.to_error()),
            None if request.verb == Verb::Delete => Ok(None),
            None => Ok(Some(json!({}))),
        }
    }
}
