//! Endpoint extraction from OpenAPI 3 and Swagger 2 documents
//!
//! Documents are handled as plain JSON values. Local `$ref`s (`#/...`) are
//! resolved up to [`MAX_REF_DEPTH`] levels; anything deeper or external is
//! left as the original reference object.

use op_core::{Error, Page, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Methods recognised as operations inside a path item, in display order
pub const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// How deep `$ref` chains are followed
pub const MAX_REF_DEPTH: usize = 8;

pub const DEFAULT_ENDPOINT_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointQuery {
    pub page: usize,
    pub limit: usize,
    pub tag: Option<String>,
}

impl Default for EndpointQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_ENDPOINT_LIMIT,
            tag: None,
        }
    }
}

impl EndpointQuery {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page,
            limit,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    /// Stable cache-key fragment
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.page,
            self.limit,
            self.tag.as_deref().unwrap_or("*")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

pub type EndpointPage = Page<EndpointSummary>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDetails {
    #[serde(flatten)]
    pub summary: EndpointSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(default)]
    pub responses: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSchema {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(default)]
    pub responses: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointExamples {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub request: Vec<Value>,
    #[serde(default)]
    pub responses: BTreeMap<String, Vec<Value>>,
}

impl EndpointExamples {
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.responses.values().all(Vec::is_empty)
    }
}

struct Operation<'a> {
    method: &'static str,
    path: &'a str,
    item: &'a Map<String, Value>,
    op: &'a Map<String, Value>,
}

impl Operation<'_> {
    fn summary(&self) -> EndpointSummary {
        EndpointSummary {
            method: self.method.to_uppercase(),
            path: self.path.to_string(),
            operation_id: str_field(self.op, "operationId"),
            summary: str_field(self.op, "summary"),
            tags: self
                .op
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| tags.iter().filter_map(|t| t.as_str().map(String::from)).collect())
                .unwrap_or_default(),
            deprecated: self.op.get("deprecated").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    /// Path-level parameters overlaid by operation-level ones, keyed by (in, name)
    fn parameters(&self, doc: &Value) -> Vec<Value> {
        let mut merged: Vec<Value> = Vec::new();
        let sources = [self.item.get("parameters"), self.op.get("parameters")];

        for list in sources.into_iter().flatten().filter_map(Value::as_array) {
            for param in list {
                let param = resolve(doc, param, 0);
                let key = param_key(&param);
                match merged.iter_mut().find(|p| key.is_some() && param_key(p) == key) {
                    Some(existing) => *existing = param,
                    None => merged.push(param),
                }
            }
        }
        merged
    }

    fn responses(&self, doc: &Value) -> BTreeMap<String, Value> {
        self.op
            .get("responses")
            .and_then(Value::as_object)
            .map(|responses| {
                responses
                    .iter()
                    .map(|(code, response)| (code.clone(), resolve(doc, response, 0)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// OpenAPI 3 `requestBody`, or the Swagger 2 `in: body` parameter
    fn request_body(&self, doc: &Value) -> Option<Value> {
        if let Some(body) = self.op.get("requestBody") {
            return Some(resolve(doc, body, 0));
        }
        self.parameters(doc)
            .into_iter()
            .find(|p| p.get("in").and_then(Value::as_str) == Some("body"))
    }
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(String::from)
}

fn param_key(param: &Value) -> Option<(String, String)> {
    Some((
        param.get("in")?.as_str()?.to_string(),
        param.get("name")?.as_str()?.to_string(),
    ))
}

/// Follow local references, replacing each `{"$ref": "#/..."}` with its target
pub fn resolve(doc: &Value, value: &Value, depth: usize) -> Value {
    if depth > MAX_REF_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                if let Some(target) = reference.strip_prefix('#').and_then(|p| doc.pointer(p)) {
                    return resolve(doc, target, depth + 1);
                }
                return value.clone();
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve(doc, v, depth + 1)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(doc, v, depth + 1)).collect()),
        other => other.clone(),
    }
}

fn operations(doc: &Value) -> Vec<Operation<'_>> {
    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut ops = Vec::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        for method in HTTP_METHODS {
            if let Some(op) = item.get(method).and_then(Value::as_object) {
                ops.push(Operation {
                    method,
                    path,
                    item,
                    op,
                });
            }
        }
    }
    ops
}

fn find_operation<'a>(doc: &'a Value, method: &str, path: &str) -> Result<Operation<'a>> {
    let method = method.to_lowercase();
    operations(doc)
        .into_iter()
        .find(|op| op.method == method && op.path == path)
        .ok_or_else(|| Error::not_found(format!("No {} {} in spec", method.to_uppercase(), path)))
}

/// Number of operations declared in a document
pub fn count_operations(doc: &Value) -> usize {
    operations(doc).len()
}

/// Paginated operation listing, optionally filtered by tag
pub fn list_endpoints(doc: &Value, query: &EndpointQuery) -> EndpointPage {
    let endpoints: Vec<EndpointSummary> = operations(doc)
        .iter()
        .map(Operation::summary)
        .filter(|e| match &query.tag {
            Some(tag) => e.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)),
            None => true,
        })
        .collect();
    Page::paginate(&endpoints, query.page, query.limit)
}

pub fn endpoint_details(doc: &Value, method: &str, path: &str) -> Result<EndpointDetails> {
    let op = find_operation(doc, method, path)?;
    Ok(EndpointDetails {
        summary: op.summary(),
        description: str_field(op.op, "description"),
        parameters: op.parameters(doc),
        request_body: op.request_body(doc),
        responses: op.responses(doc),
        security: op.op.get("security").or_else(|| doc.get("security")).cloned(),
    })
}

/// Pick the JSON media type if present, else the first one
fn preferred_media(content: &Map<String, Value>) -> Option<&Value> {
    content
        .iter()
        .find(|(mime, _)| mime.contains("json"))
        .or_else(|| content.iter().next())
        .map(|(_, media)| media)
}

fn body_schema(body: &Value) -> Option<Value> {
    if let Some(content) = body.get("content").and_then(Value::as_object) {
        return preferred_media(content).and_then(|m| m.get("schema")).cloned();
    }
    body.get("schema").cloned()
}

pub fn endpoint_schema(doc: &Value, method: &str, path: &str) -> Result<EndpointSchema> {
    let op = find_operation(doc, method, path)?;
    let responses = op
        .responses(doc)
        .into_iter()
        .filter_map(|(code, response)| body_schema(&response).map(|s| (code, resolve(doc, &s, 0))))
        .collect();

    Ok(EndpointSchema {
        method: op.method.to_uppercase(),
        path: op.path.to_string(),
        request: op
            .request_body(doc)
            .and_then(|b| body_schema(&b))
            .map(|s| resolve(doc, &s, 0)),
        responses,
    })
}

/// Examples declared on a media object, Swagger 2 response or schema
fn collect_examples(node: &Value) -> Vec<Value> {
    let mut found = Vec::new();

    if let Some(content) = node.get("content").and_then(Value::as_object) {
        for media in content.values() {
            found.extend(collect_examples(media));
        }
        return found;
    }

    if let Some(example) = node.get("example") {
        found.push(example.clone());
    }
    if let Some(examples) = node.get("examples").and_then(Value::as_object) {
        for example in examples.values() {
            // OpenAPI 3 wraps each example in {value}; Swagger 2 keys raw values by mime type
            found.push(example.get("value").cloned().unwrap_or_else(|| example.clone()));
        }
    }
    if found.is_empty() {
        if let Some(example) = node.get("schema").and_then(|s| s.get("example")) {
            found.push(example.clone());
        }
    }
    found
}

pub fn endpoint_examples(doc: &Value, method: &str, path: &str) -> Result<EndpointExamples> {
    let op = find_operation(doc, method, path)?;
    let responses = op
        .responses(doc)
        .into_iter()
        .map(|(code, response)| (code, collect_examples(&resolve(doc, &response, 0))))
        .filter(|(_, examples)| !examples.is_empty())
        .collect();

    Ok(EndpointExamples {
        method: op.method.to_uppercase(),
        path: op.path.to_string(),
        request: op
            .request_body(doc)
            .map(|b| collect_examples(&resolve(doc, &b, 0)))
            .unwrap_or_default(),
        responses,
    })
}
