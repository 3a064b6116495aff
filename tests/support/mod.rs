//! Purpose: In-process fake of the Source configuration service for integration tests.
//! Exports: `FakeSource`, `Recorded`.
//! Role: Serves the item/type/tag/link routes on a loopback port and records every request.
//! Invariants: Binds 127.0.0.1:0 so parallel tests never share a port.
//! Invariants: Injected failure statuses are consumed one per request, before routing.
#![allow(dead_code)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;

pub const USER: &str = "admin";
pub const PWD: &str = "adm1n";

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
    pub source_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct StoredItem {
    pub item_type: String,
    pub value: Vec<u8>,
    pub seq: u64,
}

#[derive(Default)]
pub struct Store {
    pub types: BTreeMap<String, Value>,
    pub items: BTreeMap<String, StoredItem>,
    pub tags: BTreeMap<String, BTreeMap<String, String>>,
    pub links: BTreeSet<(String, String)>,
    pub requests: Vec<Recorded>,
    pub fail_next: VecDeque<u16>,
    next_seq: u64,
}

type Shared = Arc<Mutex<Store>>;

pub struct FakeSource {
    addr: SocketAddr,
    store: Shared,
    stop: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeSource {
    pub fn start() -> Self {
        let store: Shared = Arc::new(Mutex::new(Store::default()));
        let (addr_tx, addr_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shared = store.clone();
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind fake source");
                addr_tx
                    .send(listener.local_addr().expect("local addr"))
                    .expect("send addr");
                let app = Router::new().fallback(handle).with_state(shared);
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = stop_rx.await;
                    })
                    .await;
            });
        });
        let addr = addr_rx.recv().expect("fake source address");
        Self {
            addr,
            store,
            stop: Some(stop_tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn fail_next(&self, statuses: &[u16]) {
        self.store().fail_next.extend(statuses.iter().copied());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.store().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.store().requests.len()
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        // Pooled client connections may stay open; the server thread is not joined.
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn handle(
    State(shared): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut store = shared.lock().unwrap_or_else(|poison| poison.into_inner());
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    store.requests.push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        authorization: header("authorization"),
        user_agent: header("user-agent"),
        source_type: header("source-type"),
        body: body.to_vec(),
    });

    if let Some(status) = store.fail_next.pop_front() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "injected failure").into_response();
    }

    let expected = format!("Basic {}", STANDARD.encode(format!("{USER}:{PWD}")));
    if header("authorization").as_deref() != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }

    let segments: Vec<String> = uri
        .path()
        .trim_start_matches('/')
        .split('/')
        .map(percent_decode)
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
    route(&mut store, &method, &segments, header("source-type"), &body)
}

fn route(
    store: &mut Store,
    method: &Method,
    segments: &[&str],
    source_type: Option<String>,
    body: &[u8],
) -> Response {
    match (method.as_str(), segments) {
        ("PUT", ["type"]) => put_type(store, body),
        ("PUT", ["item", key]) => put_item(store, key, source_type, body),
        ("GET", ["item", "tag", tags]) => {
            let wanted: Vec<&str> = tags.split('|').collect();
            let keys: Vec<String> = store
                .tags
                .iter()
                .filter(|(_, tags)| wanted.iter().any(|name| tags.contains_key(*name)))
                .map(|(key, _)| key.clone())
                .collect();
            list_response(store, keys)
        }
        ("GET", ["item", "type", item_type]) => {
            let keys = keys_by_seq(store, item_type);
            list_response(store, keys)
        }
        ("DELETE", ["item", "pop", end, item_type]) => {
            let keys = keys_by_seq(store, item_type);
            let key = match *end {
                "oldest" => keys.first().cloned(),
                "newest" => keys.last().cloned(),
                _ => return (StatusCode::BAD_REQUEST, "unknown queue end").into_response(),
            };
            match key {
                Some(key) => {
                    let response = item_response(store, &key);
                    store.items.remove(&key);
                    response
                }
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        ("GET", ["item", key]) => {
            if store.items.contains_key(*key) {
                item_response(store, key)
            } else {
                (StatusCode::NOT_FOUND, format!("item {key} not found")).into_response()
            }
        }
        ("DELETE", ["item", key]) => match store.items.remove(*key) {
            Some(_) => StatusCode::OK.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        ("GET", ["item", key, "children"]) => {
            let keys = related(store, |(from, to)| (from.as_str() == *key).then(|| to.clone()));
            list_response(store, keys)
        }
        ("GET", ["item", key, "parents"]) => {
            let keys = related(store, |(from, to)| (to.as_str() == *key).then(|| from.clone()));
            list_response(store, keys)
        }
        ("PUT", ["item", key, "tag", tag]) => {
            if !store.items.contains_key(*key) {
                return StatusCode::NOT_FOUND.into_response();
            }
            let (name, value) = tag.split_once('|').unwrap_or((tag, ""));
            store
                .tags
                .entry(key.to_string())
                .or_default()
                .insert(name.to_string(), value.to_string());
            StatusCode::OK.into_response()
        }
        ("DELETE", ["item", key, "tag", name]) => {
            let removed = store
                .tags
                .get_mut(*key)
                .and_then(|tags| tags.remove(*name));
            match removed {
                Some(_) => StatusCode::OK.into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        ("PUT", ["link", from, "to", to]) => {
            if !store.items.contains_key(*from) || !store.items.contains_key(*to) {
                return (StatusCode::NOT_FOUND, "link endpoints must exist").into_response();
            }
            store.links.insert((from.to_string(), to.to_string()));
            StatusCode::OK.into_response()
        }
        ("DELETE", ["link", from, "to", to]) => {
            store.links.remove(&(from.to_string(), to.to_string()));
            StatusCode::OK.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn put_type(store: &mut Store, body: &[u8]) -> Response {
    let descriptor: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let Some(key) = descriptor.get("key").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, "type key missing").into_response();
    };
    for field in ["schema", "proto"] {
        let decoded = descriptor
            .get(field)
            .and_then(Value::as_str)
            .map(|encoded| STANDARD.decode(encoded));
        if !matches!(decoded, Some(Ok(_))) {
            return (StatusCode::BAD_REQUEST, format!("{field} must be base64"))
                .into_response();
        }
    }
    store.types.insert(key.to_string(), descriptor.clone());
    StatusCode::CREATED.into_response()
}

fn put_item(store: &mut Store, key: &str, source_type: Option<String>, body: &[u8]) -> Response {
    let Some(item_type) = source_type else {
        return (StatusCode::BAD_REQUEST, "Source-Type header missing").into_response();
    };
    if !store.types.contains_key(&item_type) {
        return (StatusCode::BAD_REQUEST, format!("type {item_type} not registered"))
            .into_response();
    }
    if serde_json::from_slice::<Value>(body).is_err() {
        return (StatusCode::BAD_REQUEST, "item body must be json").into_response();
    }
    store.next_seq += 1;
    let seq = store.next_seq;
    store.items.insert(
        key.to_string(),
        StoredItem {
            item_type,
            value: body.to_vec(),
            seq,
        },
    );
    StatusCode::OK.into_response()
}

fn keys_by_seq(store: &Store, item_type: &str) -> Vec<String> {
    let mut matching: Vec<(&String, &StoredItem)> = store
        .items
        .iter()
        .filter(|(_, item)| item.item_type == item_type)
        .collect();
    matching.sort_by_key(|(_, item)| item.seq);
    matching.into_iter().map(|(key, _)| key.clone()).collect()
}

fn related<F>(store: &Store, pick: F) -> Vec<String>
where
    F: Fn(&(String, String)) -> Option<String>,
{
    store.links.iter().filter_map(pick).collect()
}

fn item_json(store: &Store, key: &str) -> Option<Value> {
    let item = store.items.get(key)?;
    Some(json!({
        "key": key,
        "type": item.item_type,
        "value": STANDARD.encode(&item.value),
        "updated": format!("2026-10-15T10:00:{:02}.123456789Z", item.seq % 60),
    }))
}

fn item_response(store: &Store, key: &str) -> Response {
    match item_json(store, key) {
        Some(item) => axum::Json(item).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn list_response(store: &Store, keys: Vec<String>) -> Response {
    let items: Vec<Value> = keys.iter().filter_map(|key| item_json(store, key)).collect();
    if items.is_empty() {
        // The service answers an empty result set with `null`.
        return axum::Json(Value::Null).into_response();
    }
    axum::Json(Value::Array(items)).into_response()
}

fn percent_decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
