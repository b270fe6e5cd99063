use crate::core::error::NetworkError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Request priority class
///
/// Variants are declared from most to least urgent, so the derived `Ord`
/// sorts `Critical` first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            other => Err(format!("unknown method '{}'", other)),
        }
    }
}

/// A request handed to the scheduler
///
/// `timeout` and `max_retries` fall back to the scheduler defaults when unset.
/// `cache_ttl` likewise falls back to the scheduler's default cache TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub id: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub cacheable: bool,
    pub cache_ttl: Option<Duration>,
}

impl NetworkRequest {
    /// New request with a fresh id; GET requests are cacheable by default
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            body: None,
            priority: Priority::Normal,
            timeout: None,
            max_retries: None,
            cacheable: method == HttpMethod::Get,
            cache_ttl: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(HttpMethod::Post, url).with_body(body)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Mark cacheable with an explicit TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cacheable = true;
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Connection pool key: `host[:port]` of the URL
    pub fn host(&self) -> Result<String, NetworkError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| NetworkError::InvalidRequest(format!("{}: {}", self.url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| NetworkError::InvalidRequest(format!("{}: missing host", self.url)))?;
        Ok(match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Deterministic cache key derived from method, URL and body
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hasher.update(b"\n");
        if let Some(body) = &self.body {
            hasher.update(body);
        }
        format!("req:{}", hex::encode(hasher.finalize()))
    }
}

/// Raw reply from a transport
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }
}

/// Response returned to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkResponse {
    pub data: Bytes,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub response_time: Duration,
    pub served_from_cache: bool,
    pub retry_count: u32,
}

impl NetworkResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Form in which a response is stored in the adaptive cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Base64 encoded body
    pub body: String,
}

impl CachedResponse {
    pub fn from_transport(response: &TransportResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: BASE64.encode(&response.body),
        }
    }

    /// Rebuild a caller response; `None` if the body is not valid base64
    pub fn into_response(self, response_time: Duration) -> Option<NetworkResponse> {
        let data = BASE64.decode(self.body.as_bytes()).ok()?;
        Some(NetworkResponse {
            data: Bytes::from(data),
            status_code: self.status,
            headers: self.headers,
            response_time,
            served_from_cache: true,
            retry_count: 0,
        })
    }
}

/// Scheduler-wide counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Cumulative response time of finished requests
    pub total_response_time_ms: u64,
    /// Estimated bytes moved over the network (request + response bodies)
    pub bandwidth_bytes: u64,
    pub in_flight: usize,
    pub queued: usize,
}

impl SchedulerStats {
    pub fn average_response_time_ms(&self) -> f64 {
        let finished = self.successful_requests + self.failed_requests;
        if finished == 0 {
            0.0
        } else {
            self.total_response_time_ms as f64 / finished as f64
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}
