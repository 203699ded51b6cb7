//! Requests against the remote activity log and the narrow network
//! collaborator they are sent through.

pub mod http;
pub mod remote;
pub mod requests;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::{info, warn};
use serde_json::{Map, Value};

use crate::error::Result;

pub use http::{HttpTimeSource, UreqNetwork};
pub use requests::{ApiRequest, Record, compose_notes};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Verb {
    Get,
    Post,
    Delete,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HTTP call: verb, endpoint below the API root, query arguments and an
/// optional JSON object body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub verb: Verb,
    pub uri: String,
    pub query: Vec<(String, String)>,
    pub payload: Option<Map<String, Value>>,
}

impl HttpRequest {
    pub fn new(verb: Verb, uri: impl Into<String>) -> Self {
        Self {
            verb,
            uri: uri.into(),
            query: Vec::new(),
            payload: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// A payload naming a remote timer must not also carry explicit times.
    pub fn prefer_remote_timer(&mut self) {
        if let Some(payload) = self.payload.as_mut()
            && payload.contains_key("timer")
        {
            payload.remove("start");
            payload.remove("end");
        }
    }

    /// `base_url + uri + "/"` followed by escaped query arguments.
    pub fn url(&self, base_url: &str) -> String {
        let mut url = format!("{base_url}{}/", self.uri);
        for (index, (key, value)) in self.query.iter().enumerate() {
            url.push(if index == 0 { '?' } else { '&' });
            url.push_str(key);
            url.push('=');
            url.push_str(&escape_query_value(value));
        }
        url
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb, self.url(""))
    }
}

/// Percent-encodes every UTF-8 byte outside `[A-Za-z0-9-]`.
pub fn escape_query_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02x}"));
        }
    }
    escaped
}

/// Transport to the remote system. Implementations carry their own timeout
/// and map failures onto `RequestFailed`, `Timeout` or `Connection`.
pub trait Network {
    /// Returns the decoded JSON body, or `None` for 204 responses.
    fn invoke(&mut self, request: &HttpRequest) -> Result<Option<Value>>;
}

impl<N: Network + ?Sized> Network for Rc<RefCell<N>> {
    fn invoke(&mut self, request: &HttpRequest) -> Result<Option<Value>> {
        self.borrow_mut().invoke(request)
    }
}

/// Builds and sends `request`, logging the outcome.
pub fn send(network: &mut dyn Network, request: &ApiRequest) -> Result<Option<Value>> {
    let mut http = request.to_http()?;
    http.prefer_remote_timer();
    match network.invoke(&http) {
        Ok(body) => {
            info!("{http}: ok");
            Ok(body)
        }
        Err(err) => {
            warn!("{http}: {err}");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn url_appends_trailing_slash_and_escaped_query() {
        let request = HttpRequest::new(Verb::Get, "notes")
            .with_query("tags", "BabyPod MOTD")
            .with_query("limit", 1);
        assert_eq!(
            request.url("https://baby.example/api/"),
            "https://baby.example/api/notes/?tags=BabyPod%20MOTD&limit=1"
        );
        assert_eq!(
            HttpRequest::new(Verb::Delete, "timers/3").url("http://h/api/"),
            "http://h/api/timers/3/"
        );
    }

    #[test]
    fn escaping_keeps_only_alphanumerics_and_dashes() {
        assert_eq!(escape_query_value("tummy-time_1"), "tummy-time%5f1");
        assert_eq!(escape_query_value("a&b=c"), "a%26b%3dc");
        assert_eq!(escape_query_value("é"), "%c3%a9");
    }

    #[test]
    fn remote_timer_payload_drops_explicit_times() {
        let payload = json!({"child": 1, "timer": 5, "start": "x", "end": "y"});
        let mut request = HttpRequest::new(Verb::Post, "feedings")
            .with_payload(payload.as_object().cloned().unwrap_or_default());
        request.prefer_remote_timer();
        assert_eq!(
            request.payload.map(Value::Object),
            Some(json!({"child": 1, "timer": 5}))
        );
    }
}
