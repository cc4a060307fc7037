//! Postman v2 collection decomposition.
//!
//! Requests are collected from the (possibly nested) folder tree, then
//! aggregated per `(path, method)`: query parameters and JSON body attributes
//! seen across every request to that endpoint are merged into one type sketch.
//! Each aggregated endpoint becomes a `verb` item; endpoints are grouped into
//! one `path` item per base resource. Host prefixes (`{{baseUrl}}`,
//! `https://host`) are dropped from paths, and leading `{{variables}}` are
//! collected into the base document for `.env` generation.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use super::{DecomposeResult, WorkItem, base_resource};

/// A single request as it appears in the collection.
#[derive(Debug, Clone, PartialEq)]
struct Request {
    method: String,
    path: String,
    query: Option<String>,
    env_var: Option<String>,
    body: Option<Value>,
}

/// All requests to one `(path, method)`, merged.
#[derive(Debug, Clone, Serialize)]
struct Endpoint {
    verb: String,
    path: String,
    query_params: BTreeMap<String, String>,
    body: Map<String, Value>,
}

/// Parse `text` as a Postman collection, or `None` if it is something else.
pub fn parse_collection(text: &str) -> Option<Value> {
    let root: Value = serde_json::from_str(text).ok()?;
    let is_collection = root.get("item").is_some_and(Value::is_array)
        && root.get("paths").is_none();
    is_collection.then_some(root)
}

pub fn decompose(collection: &Value) -> Result<DecomposeResult, String> {
    let requests = extract_requests(collection);
    let endpoints = aggregate(&requests);
    if endpoints.is_empty() {
        return Err("collection has no requests".to_string());
    }

    let mut env_vars: Vec<&str> = Vec::new();
    for var in requests.iter().filter_map(|r| r.env_var.as_deref()) {
        if !env_vars.contains(&var) {
            env_vars.push(var);
        }
    }
    let mut base = Map::new();
    if let Some(info) = collection.get("info") {
        base.insert("info".to_string(), info.clone());
    }
    if let Some(variables) = collection.get("variable") {
        base.insert("variable".to_string(), variables.clone());
    }
    base.insert("env_vars".to_string(), serde_json::json!(env_vars));
    let base = render(&Value::Object(base))?;

    let mut items = Vec::new();
    let mut services: HashMap<String, (usize, Vec<&Endpoint>)> = HashMap::new();
    for endpoint in &endpoints {
        let resource = base_resource(&endpoint.path);
        match services.get_mut(&resource) {
            Some((_, members)) => members.push(endpoint),
            None => {
                items.push(WorkItem::path_item(&resource, String::new()));
                services.insert(resource, (items.len() - 1, vec![endpoint]));
            }
        }
        let definition = render(&serde_json::to_value(endpoint).map_err(|e| e.to_string())?)?;
        items.push(WorkItem::verb_item(&endpoint.path, &endpoint.verb, definition));
    }

    for (resource, (index, members)) in services {
        let doc = serde_json::json!({ "service": resource, "requests": members });
        items[index].definition = render(&doc)?;
    }

    info!(
        requests = requests.len(),
        items = items.len(),
        "Decomposed Postman collection"
    );
    Ok(DecomposeResult { base, items })
}

/// Distinct request paths (query strings dropped) in collection order.
pub fn list_paths(collection: &Value) -> Result<Vec<String>, String> {
    let mut paths: Vec<String> = Vec::new();
    for request in extract_requests(collection) {
        if !paths.contains(&request.path) {
            paths.push(request.path);
        }
    }
    if paths.is_empty() {
        return Err("collection has no requests".to_string());
    }
    Ok(paths)
}

fn extract_requests(collection: &Value) -> Vec<Request> {
    let mut out = Vec::new();
    collect(collection, &mut out);
    out
}

fn collect(value: &Value, out: &mut Vec<Request>) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::Array(children)) = obj.get("item") {
                for child in children {
                    collect(child, out);
                }
            } else if let Some(request) = obj.get("request") {
                if let Some(parsed) = parse_request(request) {
                    out.push(parsed);
                }
            } else {
                for child in obj.values() {
                    collect(child, out);
                }
            }
        }
        Value::Array(children) => {
            for child in children {
                collect(child, out);
            }
        }
        _ => {}
    }
}

fn parse_request(request: &Value) -> Option<Request> {
    // A bare string is shorthand for a GET to that URL
    let (method, raw_url, body) = match request {
        Value::String(url) => ("GET".to_string(), url.as_str(), None),
        Value::Object(obj) => {
            let method = obj
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_uppercase();
            let raw_url = match obj.get("url") {
                Some(Value::String(url)) => url.as_str(),
                Some(Value::Object(url)) => url.get("raw").and_then(Value::as_str)?,
                _ => return None,
            };
            let body = obj
                .get("body")
                .and_then(|b| b.get("raw"))
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(&raw.replace(['\r', '\n'], "")).ok());
            (method, raw_url, body)
        }
        _ => return None,
    };

    let (env_var, path, query) = split_url(raw_url);
    Some(Request {
        method,
        path,
        query,
        env_var,
        body,
    })
}

/// Split a raw Postman URL into its leading variable, path and query string.
fn split_url(raw: &str) -> (Option<String>, String, Option<String>) {
    let (env_var, rest) = if let Some(stripped) = raw.strip_prefix("{{") {
        match stripped.split_once("}}") {
            Some((var, rest)) => (Some(var.to_string()), rest),
            None => (None, raw),
        }
    } else if let Some((_, after_scheme)) = raw.split_once("://") {
        (None, after_scheme.find('/').map_or("", |i| &after_scheme[i..]))
    } else {
        (None, raw)
    };

    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (rest, None),
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    (env_var, path, query)
}

fn aggregate(requests: &[Request]) -> Vec<Endpoint> {
    let mut endpoints: Vec<Endpoint> = Vec::new();
    for request in requests {
        let index = match endpoints
            .iter()
            .position(|e| e.path == request.path && e.verb == request.method)
        {
            Some(index) => index,
            None => {
                endpoints.push(Endpoint {
                    verb: request.method.clone(),
                    path: request.path.clone(),
                    query_params: BTreeMap::new(),
                    body: Map::new(),
                });
                endpoints.len() - 1
            }
        };
        let endpoint = &mut endpoints[index];
        if let Some(query) = &request.query {
            merge_query_params(&mut endpoint.query_params, query);
        }
        if let Some(Value::Object(body)) = &request.body {
            merge_attributes(&mut endpoint.body, body);
        }
    }
    endpoints
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// A parameter stays `number` only while every observed value is numeric.
fn merge_query_params(params: &mut BTreeMap<String, String>, query: &str) {
    for pair in query.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if name.is_empty() {
            continue;
        }
        let observed = if is_numeric(value) { "number" } else { "string" };
        match params.get(name).map(String::as_str) {
            None => {
                params.insert(name.to_string(), observed.to_string());
            }
            Some("number") if observed == "string" => {
                params.insert(name.to_string(), "string".to_string());
            }
            Some(_) => {}
        }
    }
}

fn merge_attributes(attributes: &mut Map<String, Value>, body: &Map<String, Value>) {
    for (key, value) in body {
        match value {
            Value::String(s) => {
                let observed = if is_numeric(s) { "number" } else { "string" };
                match attributes.get(key).and_then(Value::as_str) {
                    None => {
                        attributes.insert(key.clone(), Value::from(observed));
                    }
                    Some("number") if observed == "string" => {
                        attributes.insert(key.clone(), Value::from("string"));
                    }
                    Some(_) => {}
                }
            }
            Value::Number(_) => {
                attributes
                    .entry(key.clone())
                    .or_insert_with(|| Value::from("number"));
            }
            Value::Bool(_) => {
                attributes
                    .entry(key.clone())
                    .or_insert_with(|| Value::from("boolean"));
            }
            Value::Object(nested) => {
                let entry = attributes
                    .entry(format!("{}Object", key))
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(sketch) = entry {
                    merge_attributes(sketch, nested);
                }
            }
            Value::Array(_) => {
                attributes
                    .entry(format!("{}Object", key))
                    .or_insert_with(|| Value::from("array"));
            }
            Value::Null => {}
        }
    }
}

fn render(value: &Value) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}
