//! Purpose: Blocking HTTP client for the Source configuration item service.
//! Exports: `Client`, `QueueEnd`, `USER_AGENT`, `ApiResult`.
//! Role: Turns typed values into authenticated requests and responses back into items.
//! Invariants: Every request carries Basic auth and the client User-Agent.
//! Invariants: One call = one logical request; retries stay inside `execute`.
//! Invariants: The request timeout bounds the whole retry sequence, not one attempt.
//! Invariants: Shared state is immutable after construction; clones share one agent.
#![allow(clippy::result_large_err)]

use super::options::ClientOptions;
use super::retry::{jitter_seed, retryable_status, retryable_transport};
use super::validation::Validate;
use crate::core::error::{Error, ErrorKind};
use crate::core::item::{Item, ItemList, Link, Tag};
use crate::core::key::resolve_key;
use crate::core::schema::TypeDescriptor;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use ureq::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use ureq::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use ureq::rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use url::Url;

pub type ApiResult<T> = Result<T, Error>;

pub const USER_AGENT: &str = concat!("SW-SOURCE-CLIENT-", env!("CARGO_PKG_VERSION"));

const SOURCE_TYPE_HEADER: &str = "Source-Type";
const TAG_SEPARATOR: &str = "|";

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Url,
    token: String,
    options: ClientOptions,
    agent: ureq::Agent,
}

/// Which end of a type's queue a pop removes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueEnd {
    Oldest,
    Newest,
}

impl QueueEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueEnd::Oldest => "oldest",
            QueueEnd::Newest => "newest",
        }
    }
}

#[derive(Debug)]
struct AcceptAllServerCertVerifier;

impl ServerCertVerifier for AcceptAllServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ureq::rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// A fully read HTTP response, successful or not.
#[derive(Debug)]
struct Reply {
    status: u16,
    status_text: String,
    body: Vec<u8>,
}

impl Reply {
    fn is_success(&self) -> bool {
        self.status <= 299
    }

    fn into_success(self, action: &str) -> ApiResult<Reply> {
        if self.is_success() {
            return Ok(self);
        }
        Err(self.into_remote_error(action))
    }

    fn into_remote_error(self, action: &str) -> Error {
        let mut err = Error::new(ErrorKind::Remote)
            .with_message(format!(
                "cannot {action}, source server responded with: {} {}",
                self.status, self.status_text
            ))
            .with_status(self.status);
        let detail = String::from_utf8_lossy(&self.body);
        let detail = detail.trim();
        if !detail.is_empty() {
            err = err.with_detail(detail);
        }
        err
    }

    fn json<R>(&self) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|err| {
            Error::new(ErrorKind::Decode)
                .with_message("cannot unmarshal response body")
                .with_source(err)
        })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Builds a client for `host` (e.g. `http://127.0.0.1:8080`).
    ///
    /// `None` options mean `ClientOptions::default()`. Options that fail
    /// validation are a usage error.
    pub fn new(
        host: impl Into<String>,
        user: &str,
        pwd: &str,
        options: Option<ClientOptions>,
    ) -> ApiResult<Self> {
        let options = options.unwrap_or_default();
        options.validate().map_err(|issue| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid client options")
                .with_source(issue)
        })?;
        let base_url = normalize_base_url(host.into())?;
        let agent = build_agent(&options);
        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url,
                token: basic_token(user, pwd),
                options,
                agent,
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Registers item type `key`, deriving its schema from `T` and using
    /// `example` as the canonical prototype.
    pub fn set_type<T>(&self, key: &str, example: &T) -> ApiResult<()>
    where
        T: JsonSchema + Serialize,
    {
        let descriptor = TypeDescriptor::from_example(key, example)?;
        self.put_type(&descriptor)
    }

    /// Registers an already built type descriptor.
    pub fn put_type(&self, descriptor: &TypeDescriptor) -> ApiResult<()> {
        let body = encode_json(descriptor)?;
        let url = self.url(&["type"])?;
        self.execute("PUT", &url, None, Some(&body))?
            .into_success("set type")
            .map_err(|err| err.with_key(descriptor.key.clone()))?;
        Ok(())
    }

    /// Saves `item` under `key` as an instance of `item_type`.
    ///
    /// A `?` in `key` is replaced by a millisecond timestamp; the resolved key
    /// is returned. `item.validate()` runs before any network I/O.
    pub fn save<T>(&self, key: &str, item_type: &str, item: T) -> ApiResult<String>
    where
        T: Validate + Serialize,
    {
        item.validate().map_err(|issue| {
            Error::new(ErrorKind::Validation)
                .with_message("item rejected by validation")
                .with_key(key)
                .with_source(issue)
        })?;
        if item_type.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("item type is required to validate the item data")
                .with_key(key));
        }
        let key = resolve_key(key);
        let body = encode_json(&item).map_err(|err| err.with_key(key.clone()))?;
        let url = self.url(&["item", &key])?;
        self.execute("PUT", &url, Some(item_type), Some(&body))?
            .into_success("save item")
            .map_err(|err| err.with_key(key.clone()))?;
        Ok(key)
    }

    pub fn load_raw(&self, key: &str) -> ApiResult<Item> {
        let url = self.url(&["item", key])?;
        let reply = self
            .execute("GET", &url, None, None)?
            .into_success("get item")
            .map_err(|err| err.with_key(key))?;
        reply.json()
    }

    pub fn load<T>(&self, key: &str) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        self.load_raw(key)?.typed()
    }

    /// Loads `key` into an existing prototype; see `Item::typed_into`.
    pub fn load_into<'a, T>(&self, key: &str, prototype: &'a mut T) -> ApiResult<&'a mut T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.load_raw(key)?.typed_into(prototype)
    }

    pub fn delete(&self, key: &str) -> ApiResult<()> {
        let url = self.url(&["item", key])?;
        self.execute("DELETE", &url, None, None)?
            .into_success("delete item")
            .map_err(|err| err.with_key(key))?;
        Ok(())
    }

    /// Items carrying any of `tags`.
    pub fn load_items_by_tag_raw(&self, tags: &[&str]) -> ApiResult<ItemList> {
        if tags.is_empty() || tags.iter().any(|tag| tag.is_empty()) {
            return Err(Error::new(ErrorKind::Usage).with_message("at least one tag is required"));
        }
        let joined = tags.join(TAG_SEPARATOR);
        let url = self.url(&["item", "tag", &joined])?;
        self.fetch_list(&url, "get tagged items")
    }

    pub fn load_items_by_tag<T, F>(&self, tags: &[&str], factory: F) -> ApiResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> T,
    {
        self.load_items_by_tag_raw(tags)?.typed(factory)
    }

    pub fn load_items_by_type_raw(&self, item_type: &str) -> ApiResult<ItemList> {
        let url = self.url(&["item", "type", item_type])?;
        self.fetch_list(&url, &format!("get items for type '{item_type}'"))
    }

    pub fn load_items_by_type<T, F>(&self, item_type: &str, factory: F) -> ApiResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> T,
    {
        self.load_items_by_type_raw(item_type)?.typed(factory)
    }

    pub fn load_children_raw(&self, key: &str) -> ApiResult<ItemList> {
        let url = self.url(&["item", key, "children"])?;
        self.fetch_list(&url, "get children for item")
            .map_err(|err| err.with_key(key))
    }

    pub fn load_children<T, F>(&self, key: &str, factory: F) -> ApiResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> T,
    {
        self.load_children_raw(key)?.typed(factory)
    }

    pub fn load_parents_raw(&self, key: &str) -> ApiResult<ItemList> {
        let url = self.url(&["item", key, "parents"])?;
        self.fetch_list(&url, "get parents for item")
            .map_err(|err| err.with_key(key))
    }

    pub fn load_parents<T, F>(&self, key: &str, factory: F) -> ApiResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> T,
    {
        self.load_parents_raw(key)?.typed(factory)
    }

    /// Removes and returns one item of `item_type`; `None` when the queue is empty.
    pub fn pop_raw(&self, end: QueueEnd, item_type: &str) -> ApiResult<Option<Item>> {
        let url = self.url(&["item", "pop", end.as_str(), item_type])?;
        let reply = self.execute("DELETE", &url, None, None)?;
        if reply.status == 404 {
            debug!(item_type, end = end.as_str(), "pop found an empty queue");
            return Ok(None);
        }
        let reply = reply.into_success(&format!("pop {} item", end.as_str()))?;
        reply.json().map(Some)
    }

    pub fn pop_oldest_raw(&self, item_type: &str) -> ApiResult<Option<Item>> {
        self.pop_raw(QueueEnd::Oldest, item_type)
    }

    pub fn pop_newest_raw(&self, item_type: &str) -> ApiResult<Option<Item>> {
        self.pop_raw(QueueEnd::Newest, item_type)
    }

    pub fn pop_oldest<T>(&self, item_type: &str) -> ApiResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.pop_oldest_raw(item_type)?
            .map(|item| item.typed())
            .transpose()
    }

    pub fn pop_newest<T>(&self, item_type: &str) -> ApiResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.pop_newest_raw(item_type)?
            .map(|item| item.typed())
            .transpose()
    }

    /// Tags `item_key` with `name`, or `name|value` when a non-empty value is given.
    pub fn tag(&self, item_key: &str, name: &str, value: Option<&str>) -> ApiResult<()> {
        let tag = Tag::new(item_key, name, value);
        let segment = tag.segment()?;
        let url = self.url(&["item", &tag.item_key, "tag", &segment])?;
        self.execute("PUT", &url, None, None)?
            .into_success("tag item")
            .map_err(|err| err.with_key(item_key))?;
        Ok(())
    }

    pub fn untag(&self, item_key: &str, name: &str) -> ApiResult<()> {
        let tag = Tag::new(item_key, name, None);
        let segment = tag.segment()?;
        let url = self.url(&["item", &tag.item_key, "tag", &segment])?;
        self.execute("DELETE", &url, None, None)?
            .into_success("untag item")
            .map_err(|err| err.with_key(item_key))?;
        Ok(())
    }

    pub fn link(&self, from_key: &str, to_key: &str) -> ApiResult<()> {
        self.send_link("PUT", &Link::new(from_key, to_key), "link items")
    }

    pub fn unlink(&self, from_key: &str, to_key: &str) -> ApiResult<()> {
        self.send_link("DELETE", &Link::new(from_key, to_key), "unlink items")
    }

    fn send_link(&self, method: &'static str, link: &Link, action: &str) -> ApiResult<()> {
        let url = self.url(&["link", &link.from, "to", &link.to])?;
        self.execute(method, &url, None, None)?
            .into_success(action)
            .map_err(|err| err.with_key(link.from.clone()))?;
        Ok(())
    }

    fn fetch_list(&self, url: &Url, action: &str) -> ApiResult<ItemList> {
        let reply = self.execute("GET", url, None, None)?.into_success(action)?;
        let items: Option<ItemList> = reply.json()?;
        Ok(items.unwrap_or_default())
    }

    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        build_url(&self.inner.base_url, segments)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        self.inner
            .agent
            .request(method, url.as_str())
            .set("Authorization", &self.inner.token)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/json")
    }

    /// Sends one logical request, retrying transient failures until the
    /// retry budget or the call deadline runs out.
    ///
    /// Any HTTP response (including error statuses) comes back as a `Reply`;
    /// only transport failures become errors here.
    fn execute(
        &self,
        method: &'static str,
        url: &Url,
        item_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> ApiResult<Reply> {
        let policy = self.inner.options.retry;
        let deadline = Instant::now() + self.inner.options.request_timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::new(ErrorKind::Transport).with_message(format!(
                    "{method} {url} timed out after {attempt} attempt(s)"
                )));
            }

            let mut request = self.request(method, url).timeout(remaining);
            if let Some(item_type) = item_type {
                request = request.set(SOURCE_TYPE_HEADER, item_type);
            }
            debug!(method, url = %url, attempt, "sending request");
            let response = match body {
                Some(body) => request
                    .set("Content-Type", "application/json")
                    .send_bytes(body),
                None => request.call(),
            };

            let (outcome, reason) = match response {
                Ok(resp) => return read_reply(resp),
                Err(ureq::Error::Status(code, resp)) => {
                    let reply = read_reply(resp)?;
                    if !retryable_status(code) {
                        return Ok(reply);
                    }
                    (Ok(reply), format!("status {code}"))
                }
                Err(ureq::Error::Transport(err)) => {
                    let retryable = retryable_transport(&err);
                    let reason = err.to_string();
                    let failure = Error::new(ErrorKind::Transport)
                        .with_message(format!(
                            "{method} {url} failed after {attempt} attempt(s)"
                        ))
                        .with_source(err);
                    if !retryable {
                        return Err(failure);
                    }
                    (Err(failure), reason)
                }
            };

            if attempt > policy.max_retries {
                return outcome;
            }
            let wait = policy.delay_for_attempt(attempt, jitter_seed());
            if wait >= deadline.saturating_duration_since(Instant::now()) {
                return outcome;
            }
            warn!(
                method,
                url = %url,
                attempt,
                wait_ms = wait.as_millis() as u64,
                reason = %reason,
                "retrying request"
            );
            std::thread::sleep(wait);
        }
    }
}

fn build_agent(options: &ClientOptions) -> ureq::Agent {
    let builder = ureq::AgentBuilder::new();
    if !options.insecure_transport {
        return builder.build();
    }
    let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
    let tls_config = ureq::rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAllServerCertVerifier))
        .with_no_client_auth();
    builder.tls_config(Arc::new(tls_config)).build()
}

fn read_reply(response: ureq::Response) -> ApiResult<Reply> {
    let status = response.status();
    let status_text = response.status_text().to_string();
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message("cannot read response body")
                .with_status(status)
                .with_source(err)
        })?;
    Ok(Reply {
        status,
        status_text,
        body,
    })
}

fn encode_json<T>(value: &T) -> ApiResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value).map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message("failed to encode request json")
            .with_source(err)
    })
}

fn basic_token(user: &str, pwd: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{pwd}")))
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid source host url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("source host url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("source host url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("source host url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}
