//! API definition decomposition into work items.
//!
//! Definitions are read from a file or an http(s) URL ([`load_definition`]).
//! Postman collections are handled by [`postman`]; anything else is parsed as
//! an OpenAPI document and split into:
//! - one `base` document (everything except `paths`), used for `.env` generation
//! - one `path` item per base resource (`/pets`, `/store`), whose document
//!   carries every path under that resource
//! - one `verb` item per `(path, HTTP verb)` pair
//!
//! Order follows the definition: a resource's `path` item sits where its first
//! path appeared, verbs follow in document order. Items are keyed so that
//! equality is identity even when two documents happen to render the same.

pub mod postman;
mod source;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::info;

use crate::errors::PipelineError;

pub use source::{is_url, load_definition};

const HTTP_VERBS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemKind {
    Path,
    Verb,
}

/// One unit of decomposed input, processed independently in the generate loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identity, e.g. `path:/pets` or `verb:/pets/{id}:GET`
    pub key: String,
    pub kind: WorkItemKind,
    /// Base resource for `path` items, full path for `verb` items
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    /// YAML document scoped to this item
    pub definition: String,
}

impl WorkItem {
    fn path_item(resource: &str, definition: String) -> Self {
        Self {
            key: format!("path:{}", resource),
            kind: WorkItemKind::Path,
            path: resource.to_string(),
            verb: None,
            definition,
        }
    }

    fn verb_item(path: &str, verb: &str, definition: String) -> Self {
        let verb = verb.to_uppercase();
        Self {
            key: format!("verb:{}:{}", path, verb),
            kind: WorkItemKind::Verb,
            path: path.to_string(),
            verb: Some(verb),
            definition,
        }
    }

    /// `/` + the first path segment, e.g. `/pets` for `/pets/{id}`.
    pub fn resource(&self) -> String {
        base_resource(&self.path)
    }

    /// Whether this item is selected by an endpoint filter (empty = all).
    ///
    /// An endpoint selects every path it is a prefix of. A resource item is
    /// also selected by any endpoint under it, so the models its verbs need
    /// are still generated.
    pub fn matches_endpoints(&self, endpoints: &[String]) -> bool {
        endpoints.is_empty()
            || endpoints.iter().any(|e| {
                self.path.starts_with(e.as_str())
                    || (self.kind == WorkItemKind::Path && base_resource(e) == self.path)
            })
    }

    pub fn label(&self) -> String {
        match &self.verb {
            Some(verb) => format!("{} {}", verb, self.path),
            None => self.path.clone(),
        }
    }
}

/// Output of the decomposition stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecomposeResult {
    pub base: String,
    pub items: Vec<WorkItem>,
}

/// Load a definition from a file or URL and decompose it.
pub async fn decompose_source(location: &str) -> Result<DecomposeResult, PipelineError> {
    let text = load_definition(location).await?;
    decompose_str(&text).map_err(|message| PipelineError::InvalidDefinition {
        location: location.to_string(),
        message,
    })
}

pub fn decompose_str(text: &str) -> Result<DecomposeResult, String> {
    if let Some(collection) = postman::parse_collection(text) {
        return postman::decompose(&collection);
    }
    decompose_openapi(text)
}

fn decompose_openapi(text: &str) -> Result<DecomposeResult, String> {
    let root: Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
    let root = root
        .as_mapping()
        .ok_or_else(|| "definition must be a mapping at the top level".to_string())?;
    let paths = match root.get("paths") {
        Some(Value::Mapping(paths)) => paths.clone(),
        Some(_) => return Err("'paths' must be a mapping".to_string()),
        None => return Err("definition has no 'paths'".to_string()),
    };

    let mut base = root.clone();
    base.remove("paths");
    let base = render(&Value::Mapping(base))?;

    let mut items: Vec<WorkItem> = Vec::new();
    // resource -> (index into items, merged paths mapping)
    let mut resources: HashMap<String, (usize, Mapping)> = HashMap::new();

    for (path_key, path_data) in &paths {
        let path = path_key
            .as_str()
            .ok_or_else(|| "path keys must be strings".to_string())?;
        let resource = base_resource(path);

        match resources.get_mut(&resource) {
            Some((_, merged)) => {
                if !merged.contains_key(path_key) {
                    merged.insert(path_key.clone(), path_data.clone());
                }
            }
            None => {
                let mut merged = Mapping::new();
                merged.insert(path_key.clone(), path_data.clone());
                items.push(WorkItem::path_item(&resource, String::new()));
                resources.insert(resource.clone(), (items.len() - 1, merged));
            }
        }

        if let Value::Mapping(operations) = path_data {
            for (verb_key, verb_data) in operations {
                let Some(verb) = verb_key.as_str() else {
                    continue;
                };
                if !HTTP_VERBS.contains(&verb.to_lowercase().as_str()) {
                    continue;
                }
                let mut single = Mapping::new();
                single.insert(verb_key.clone(), verb_data.clone());
                let mut scoped_paths = Mapping::new();
                scoped_paths.insert(path_key.clone(), Value::Mapping(single));
                let doc = with_paths(root, scoped_paths);
                items.push(WorkItem::verb_item(path, verb, render(&doc)?));
            }
        }
    }

    for (index, merged) in resources.into_values() {
        items[index].definition = render(&with_paths(root, merged))?;
    }

    info!(items = items.len(), "Decomposed API definition");
    Ok(DecomposeResult { base, items })
}

/// Distinct paths in document order, for the endpoint listing.
pub fn list_paths(text: &str) -> Result<Vec<String>, String> {
    if let Some(collection) = postman::parse_collection(text) {
        return postman::list_paths(&collection);
    }
    let root: Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
    let paths = root
        .get("paths")
        .and_then(Value::as_mapping)
        .ok_or_else(|| "definition has no 'paths' mapping".to_string())?;
    Ok(paths
        .keys()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect())
}

pub(crate) fn base_resource(path: &str) -> String {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    format!("/{}", first)
}

fn with_paths(root: &Mapping, paths: Mapping) -> Value {
    let mut doc = root.clone();
    doc.insert(Value::String("paths".to_string()), Value::Mapping(paths));
    Value::Mapping(doc)
}

fn render(value: &Value) -> Result<String, String> {
    serde_yaml::to_string(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETSTORE: &str = r#"
openapi: 3.0.0
info:
  title: Petstore
  version: 1.0.0
servers:
  - url: http://localhost:8080
paths:
  /pets:
    get:
      summary: List pets
    post:
      summary: Create pet
  /pets/{id}:
    parameters:
      - name: id
        in: path
    get:
      summary: Get pet
  /store/inventory:
    get:
      summary: Inventory
"#;

    fn keys(d: &DecomposeResult) -> Vec<&str> {
        d.items.iter().map(|i| i.key.as_str()).collect()
    }

    #[test]
    fn test_items_follow_document_order() {
        let d = decompose_str(PETSTORE).unwrap();
        assert_eq!(
            keys(&d),
            vec![
                "path:/pets",
                "verb:/pets:GET",
                "verb:/pets:POST",
                "verb:/pets/{id}:GET",
                "path:/store",
                "verb:/store/inventory:GET",
            ]
        );
    }

    #[test]
    fn test_base_excludes_paths() {
        let d = decompose_str(PETSTORE).unwrap();
        assert!(d.base.contains("Petstore"));
        assert!(!d.base.contains("paths"));
    }

    #[test]
    fn test_resource_item_merges_all_paths_under_it() {
        let d = decompose_str(PETSTORE).unwrap();
        let pets = &d.items[0];
        assert_eq!(pets.kind, WorkItemKind::Path);
        assert!(pets.definition.contains("/pets/{id}"));
        assert!(pets.definition.contains("List pets"));
        assert!(!pets.definition.contains("Inventory"));
    }

    #[test]
    fn test_verb_item_is_scoped_to_one_operation() {
        let d = decompose_str(PETSTORE).unwrap();
        let post = d.items.iter().find(|i| i.key == "verb:/pets:POST").unwrap();
        assert!(post.definition.contains("Create pet"));
        assert!(!post.definition.contains("List pets"));
        assert!(post.definition.contains("servers"));
        assert_eq!(post.label(), "POST /pets");
    }

    #[test]
    fn test_non_verb_keys_are_not_items() {
        let d = decompose_str(PETSTORE).unwrap();
        assert!(!d.items.iter().any(|i| i.key.contains("PARAMETERS")));
    }

    #[test]
    fn test_decomposition_is_deterministic() {
        assert_eq!(decompose_str(PETSTORE).unwrap(), decompose_str(PETSTORE).unwrap());
    }

    #[test]
    fn test_json_definitions_are_accepted() {
        let json = r#"{"openapi": "3.0.0", "paths": {"/users": {"get": {}}}}"#;
        let d = decompose_str(json).unwrap();
        assert_eq!(keys(&d), vec!["path:/users", "verb:/users:GET"]);
    }

    #[test]
    fn test_missing_paths_is_rejected() {
        let err = decompose_str("openapi: 3.0.0\ninfo: {}").unwrap_err();
        assert!(err.contains("no 'paths'"));
        assert!(decompose_str("- just\n- a list").is_err());
    }

    #[test]
    fn test_endpoint_filter_matches_by_prefix() {
        let d = decompose_str(PETSTORE).unwrap();
        let filter = vec!["/pets".to_string()];
        let selected: Vec<_> = d
            .items
            .iter()
            .filter(|i| i.matches_endpoints(&filter))
            .map(|i| i.key.as_str())
            .collect();
        assert_eq!(selected.len(), 4);
        assert!(d.items.iter().all(|i| i.matches_endpoints(&[])));

        let exact = vec!["/store/inventory".to_string()];
        assert!(d.items[5].matches_endpoints(&exact));

        let prefix = vec!["/st".to_string()];
        assert!(d.items[4].matches_endpoints(&prefix));
        assert!(d.items[5].matches_endpoints(&prefix));
        assert!(!d.items[0].matches_endpoints(&prefix));
    }

    #[test]
    fn test_endpoint_below_resource_keeps_resource_models() {
        let d = decompose_str(PETSTORE).unwrap();
        let filter = vec!["/pets/{id}".to_string()];
        let selected: Vec<_> = d
            .items
            .iter()
            .filter(|i| i.matches_endpoints(&filter))
            .map(|i| i.key.as_str())
            .collect();
        assert_eq!(selected, vec!["path:/pets", "verb:/pets/{id}:GET"]);
    }

    #[test]
    fn test_list_paths() {
        assert_eq!(
            list_paths(PETSTORE).unwrap(),
            vec!["/pets", "/pets/{id}", "/store/inventory"]
        );
    }

    #[tokio::test]
    async fn test_decompose_source_reports_location_on_error() {
        let err = decompose_source("/nonexistent/api.yaml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/api.yaml"));
    }

    #[tokio::test]
    async fn test_decompose_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.yaml");
        std::fs::write(&path, PETSTORE).unwrap();
        let d = decompose_source(path.to_str().unwrap()).await.unwrap();
        assert_eq!(d.items.len(), 6);
    }
}
