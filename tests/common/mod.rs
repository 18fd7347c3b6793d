//! In-memory stand-in for the gateway admin API
//!
//! Stores JSON objects per collection, assigns IDs and timestamps the way the
//! gateway does, pages list responses and records every request so tests can
//! assert on paths and payloads.

#![allow(dead_code)]

use async_trait::async_trait;
use gateway_sync::client::Page;
use gateway_sync::{AdminApi, SyncError, SyncResult};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Collections reached through a parent: (parent collection, segment, stored kind, parent field)
const SCOPED: &[(&str, &str, &str, &str)] = &[
    ("consumers", "key-auth", "key-auths", "consumer"),
    ("consumers", "basic-auth", "basic-auths", "consumer"),
    ("consumers", "hmac-auth", "hmac-auths", "consumer"),
    ("consumers", "jwt", "jwts", "consumer"),
    ("consumers", "mtls-auth", "mtls-auths", "consumer"),
    ("consumers", "oauth2", "oauth2", "consumer"),
    ("consumers", "acls", "acls", "consumer"),
    ("upstreams", "targets", "targets", "upstream"),
];

#[derive(Debug, Clone)]
struct Row {
    kind: String,
    body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Value,
}

/// Location a path addresses
struct Target {
    kind: String,
    /// `(field, parent id)` for scoped collections
    parent: Option<(String, String)>,
    member: Option<String>,
}

pub struct FakeGateway {
    rows: Mutex<Vec<Row>>,
    requests: Mutex<Vec<Request>>,
    page_size: usize,
    clock: AtomicI64,
    next_id: AtomicUsize,
    writes: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    fail_on: Mutex<Option<(String, String)>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            page_size: 2,
            clock: AtomicI64::new(1_700_000_000),
            next_id: AtomicUsize::new(1),
            writes: AtomicUsize::new(0),
            cancel_after: Mutex::new(None),
            fail_on: Mutex::new(None),
        }
    }

    /// Seed an object; it gets an ID and timestamps when missing
    pub fn seed(&self, kind: &str, mut body: Value) -> String {
        let id = self.stamp(&mut body, None);
        self.rows.lock().unwrap().push(Row {
            kind: kind.to_string(),
            body,
        });
        id
    }

    /// Cancel `token` once `writes` mutating requests have completed
    pub fn cancel_after(&self, writes: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((writes, token));
    }

    /// Answer 500 to requests with this method whose path starts with `prefix`
    pub fn fail_on(&self, method: &str, prefix: &str) {
        *self.fail_on.lock().unwrap() = Some((method.to_string(), prefix.to_string()));
    }

    pub fn all(&self, kind: &str) -> Vec<Value> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.kind == kind)
            .map(|row| row.body.clone())
            .collect()
    }

    pub fn find(&self, kind: &str, id_or_name: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.kind == kind && matches(&row.body, id_or_name))
            .map(|row| row.body.clone())
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Mutating requests only
    pub fn writes(&self) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != "GET")
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn stamp(&self, body: &mut Value, id: Option<&str>) -> String {
        let object = body.as_object_mut().expect("resources are objects");
        let id = match (id, object.get("id").and_then(Value::as_str)) {
            (Some(id), _) => id.to_string(),
            (None, Some(existing)) => existing.to_string(),
            (None, None) => format!("00000000-0000-4000-8000-{:012}", self.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        object.insert("id".to_string(), json!(id));
        let now = self.clock.fetch_add(1, Ordering::SeqCst);
        object.entry("created_at").or_insert(json!(now));
        object.insert("updated_at".to_string(), json!(now));
        id
    }

    fn record(&self, method: &str, path: &str, body: &Value) -> SyncResult<()> {
        self.requests.lock().unwrap().push(Request {
            method: method.to_string(),
            path: path.to_string(),
            body: body.clone(),
        });
        if let Some((fail_method, prefix)) = self.fail_on.lock().unwrap().as_ref() {
            if fail_method == method && path.starts_with(prefix.as_str()) {
                return Err(SyncError::Api {
                    status: 500,
                    method: method.to_string(),
                    url: path.to_string(),
                    message: r#"{"message":"boom"}"#.to_string(),
                });
            }
        }
        Ok(())
    }

    fn written(&self) {
        let done = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if done >= *after {
                token.cancel();
            }
        }
    }

    fn parse(&self, path: &str) -> SyncResult<Target> {
        let segments: Vec<String> = path
            .trim_start_matches('/')
            .split('/')
            .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
            .collect();
        match segments.as_slice() {
            [kind] => Ok(Target {
                kind: kind.clone(),
                parent: None,
                member: None,
            }),
            [kind, member] => Ok(Target {
                kind: kind.clone(),
                parent: None,
                member: Some(member.clone()),
            }),
            [parent_kind, parent, segment, rest @ ..] if rest.len() <= 1 => {
                let (_, _, kind, field) = SCOPED
                    .iter()
                    .find(|(p, s, _, _)| *p == parent_kind.as_str() && *s == segment.as_str())
                    .ok_or_else(|| not_found(path))?;
                let parent_id = self
                    .find(parent_kind, parent)
                    .and_then(|p| p.get("id").and_then(Value::as_str).map(str::to_string))
                    .ok_or_else(|| not_found(path))?;
                Ok(Target {
                    kind: kind.to_string(),
                    parent: Some((field.to_string(), parent_id)),
                    member: rest.first().cloned(),
                })
            }
            _ => Err(not_found(path)),
        }
    }

    fn write(&self, method: &str, path: &str, body: &Value) -> SyncResult<Value> {
        self.record(method, path, body)?;
        let target = self.parse(path)?;
        let mut body = body.clone();
        if let Some((field, parent_id)) = &target.parent {
            body[field.as_str()] = json!({ "id": parent_id });
        }

        let mut rows = self.rows.lock().unwrap();
        let existing = target.member.as_ref().and_then(|member| {
            rows.iter()
                .position(|row| row.kind == target.kind && matches(&row.body, member))
        });

        let stored = match (method, existing) {
            ("POST", _) => {
                let conflict = match target.parent {
                    None => unique_conflict(&rows, &target.kind, &body),
                    Some(_) => None,
                };
                if let Some(conflict) = conflict {
                    return Err(SyncError::Api {
                        status: 409,
                        method: method.to_string(),
                        url: path.to_string(),
                        message: format!(r#"{{"message":"UNIQUE violation on {}"}}"#, conflict),
                    });
                }
                self.stamp(&mut body, None);
                rows.push(Row {
                    kind: target.kind.clone(),
                    body: body.clone(),
                });
                body
            }
            ("PUT", Some(index)) => {
                let created_at = rows[index].body.get("created_at").cloned();
                let id = rows[index].body.get("id").and_then(Value::as_str).map(str::to_string);
                if let Some(created_at) = created_at {
                    body["created_at"] = created_at;
                }
                self.stamp(&mut body, id.as_deref());
                rows[index].body = body.clone();
                body
            }
            ("PUT", None) => {
                let member = target.member.clone().ok_or_else(|| not_found(path))?;
                self.stamp(&mut body, Some(&member));
                rows.push(Row {
                    kind: target.kind.clone(),
                    body: body.clone(),
                });
                body
            }
            ("PATCH", Some(index)) => {
                let row = &mut rows[index].body;
                if let (Some(row), Some(patch)) = (row.as_object_mut(), body.as_object()) {
                    for (key, value) in patch {
                        row.insert(key.clone(), value.clone());
                    }
                }
                let id = row.get("id").and_then(Value::as_str).map(str::to_string);
                self.stamp(row, id.as_deref());
                row.clone()
            }
            _ => return Err(not_found(path)),
        };
        drop(rows);
        self.written();
        Ok(stored)
    }
}

fn matches(body: &Value, id_or_name: &str) -> bool {
    ["id", "name", "username"]
        .iter()
        .any(|field| body.get(field).and_then(Value::as_str) == Some(id_or_name))
}

fn unique_conflict(rows: &[Row], kind: &str, body: &Value) -> Option<String> {
    ["name", "username", "key"].iter().find_map(|field| {
        let value = body.get(field).and_then(Value::as_str)?;
        rows.iter()
            .any(|row| row.kind == kind && row.body.get(field).and_then(Value::as_str) == Some(value))
            .then(|| format!("{}={}", field, value))
    })
}

fn not_found(path: &str) -> SyncError {
    SyncError::NotFound {
        entity_type: "resource".to_string(),
        key: path.to_string(),
    }
}

fn has_tags(body: &Value, tags: &[String]) -> bool {
    let present: Vec<&str> = body
        .get("tags")
        .and_then(Value::as_array)
        .map(|t| t.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    tags.iter().all(|tag| present.contains(&tag.as_str()))
}

#[async_trait]
impl AdminApi for FakeGateway {
    async fn get(&self, path: &str) -> SyncResult<Value> {
        self.record("GET", path, &Value::Null)?;
        let target = self.parse(path)?;
        let member = target.member.ok_or_else(|| not_found(path))?;
        self.find(&target.kind, &member).ok_or_else(|| not_found(path))
    }

    async fn list_page(&self, path: &str, offset: Option<&str>, tags: &[String]) -> SyncResult<Page> {
        self.record("GET", path, &json!({ "offset": offset, "tags": tags }))?;
        let target = self.parse(path)?;
        let items: Vec<Value> = self
            .all(&target.kind)
            .into_iter()
            .filter(|item| match &target.parent {
                Some((field, parent_id)) => item[field.as_str()]["id"].as_str() == Some(parent_id.as_str()),
                None => true,
            })
            .filter(|item| has_tags(item, tags))
            .collect();

        let start: usize = offset.and_then(|o| o.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        let data = items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
        Ok(Page {
            data,
            offset: (end < items.len()).then(|| end.to_string()),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> SyncResult<Value> {
        self.write("POST", path, body)
    }

    async fn put(&self, path: &str, body: &Value) -> SyncResult<Value> {
        self.write("PUT", path, body)
    }

    async fn patch(&self, path: &str, body: &Value) -> SyncResult<Value> {
        self.write("PATCH", path, body)
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        self.record("DELETE", path, &Value::Null)?;
        let target = self.parse(path)?;
        let member = target.member.ok_or_else(|| not_found(path))?;
        let mut rows = self.rows.lock().unwrap();
        let Some(index) = rows
            .iter()
            .position(|row| row.kind == target.kind && matches(&row.body, &member))
        else {
            return Err(not_found(path));
        };
        let removed = rows.remove(index);
        let removed_id = removed.body["id"].as_str().unwrap_or_default().to_string();
        // children pointing at the removed row go with it
        rows.retain(|row| {
            !row.body
                .as_object()
                .map(|object| object.values().any(|v| v["id"].as_str() == Some(removed_id.as_str())))
                .unwrap_or(false)
        });
        drop(rows);
        self.written();
        Ok(())
    }
}

/// A JSON object from `key: value` pairs, for terse seeds
pub fn object(pairs: &[(&str, Value)]) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value.clone());
    }
    Value::Object(map)
}
