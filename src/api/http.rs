use std::error::Error as _;
use std::io;
use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::api::{HttpRequest, Network};
use crate::clock::TimeSource;
use crate::error::{Error, Result};
use crate::util::{Timestamp, parse_timestamp};

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout(timeout)
        .build()
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = transport.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>()
            && matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
        {
            return true;
        }
        source = err.source();
    }
    false
}

fn map_ureq_error(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(status, _) => Error::RequestFailed { status },
        ureq::Error::Transport(transport) if is_timeout(&transport) => Error::Timeout,
        ureq::Error::Transport(transport) => Error::Connection(transport.to_string()),
    }
}

/// Blocking HTTP transport to the remote activity log.
pub struct UreqNetwork {
    agent: ureq::Agent,
    base_url: String,
    auth_token: Option<String>,
}

impl UreqNetwork {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Self {
        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            agent: agent(timeout),
            base_url,
            auth_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Network for UreqNetwork {
    fn invoke(&mut self, request: &HttpRequest) -> Result<Option<Value>> {
        let url = request.url(&self.base_url);
        let mut call = self
            .agent
            .request(request.verb.as_str(), &url)
            .set("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            call = call.set("Authorization", &format!("Token {token}"));
        }

        let response = match &request.payload {
            Some(payload) => call
                .set("Content-Type", "application/json")
                .send_string(&serde_json::to_string(payload)?),
            None => call.call(),
        }
        .map_err(map_ureq_error)?;

        let status = response.status();
        debug!("{} {url} -> {status}", request.verb);
        if status == 204 {
            return Ok(None);
        }
        let body = response.into_string()?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str(&body)
            .map_err(|err| Error::payload(format!("response from {url} is not JSON: {err}")))?;
        Ok(Some(value))
    }
}

/// Fetches the current local time as a bare ISO-8601 string, e.g. from a
/// time service that answers `2025-01-01T08:00:00.000-05:00`.
pub struct HttpTimeSource {
    agent: ureq::Agent,
    url: String,
}

impl HttpTimeSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            url: url.into(),
        }
    }
}

impl TimeSource for HttpTimeSource {
    fn fetch(&mut self) -> Result<Timestamp> {
        let body = self
            .agent
            .get(&self.url)
            .call()
            .map_err(map_ureq_error)?
            .into_string()?;
        parse_timestamp(body.trim().trim_matches('"'))
    }
}
