//! Path and content validation for locally stored specs
//!
//! Anything derived from caller-supplied names is sanitized and re-validated
//! here before it reaches the filesystem.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

/// Longest path we are willing to write to
pub const MAX_PATH_LENGTH: usize = 1024;

/// Default lower bound for an uploaded spec
pub const DEFAULT_MIN_SPEC_BYTES: usize = 10;

/// Default upper bound for an uploaded spec (10 MiB)
pub const DEFAULT_MAX_SPEC_BYTES: usize = 10 * 1024 * 1024;

/// Size bounds applied to uploaded spec content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLimits {
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl Default for ContentLimits {
    fn default() -> Self {
        Self {
            min_bytes: DEFAULT_MIN_SPEC_BYTES,
            max_bytes: DEFAULT_MAX_SPEC_BYTES,
        }
    }
}

/// Serialization format a spec was supplied in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecFormat {
    Json,
    Yaml,
}

/// A spec document that passed content validation
#[derive(Debug, Clone)]
pub struct ValidatedSpec {
    pub document: Value,
    pub format: SpecFormat,
    pub title: String,
    pub description: Option<String>,
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Fail fast on missing name or version.
pub fn validate_name_version(name: &str, version: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("Spec name is required"));
    }
    if version.trim().is_empty() {
        return Err(Error::validation("Spec version is required"));
    }
    Ok(())
}

/// Base directories absolute paths must live under
pub fn allowed_base_dirs() -> Vec<PathBuf> {
    let mut bases = vec![std::env::temp_dir()];
    if let Ok(cwd) = std::env::current_dir() {
        bases.push(cwd);
    }
    if let Some(cache) = dirs::cache_dir() {
        bases.push(cache);
    }
    bases
}

/// Validate a path against traversal, charset, length and base-directory rules.
pub fn validate_path(path: &Path) -> Result<()> {
    validate_path_within(path, &allowed_base_dirs())
}

/// Same as [`validate_path`] with an explicit set of allowed bases.
pub fn validate_path_within(path: &Path, bases: &[PathBuf]) -> Result<()> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::validation("Path is not valid UTF-8"))?;

    if text.is_empty() {
        return Err(Error::validation("Path is empty"));
    }
    if text.len() > MAX_PATH_LENGTH {
        return Err(Error::validation(format!(
            "Path exceeds {} characters",
            MAX_PATH_LENGTH
        )));
    }
    if text.contains("..") || text.split(&['/', '\\'][..]).any(|seg| seg.starts_with('~')) {
        return Err(Error::validation(format!("Path traversal detected in '{}'", text)));
    }
    if let Some(bad) = text
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/' | '\\' | ':' | ' ')))
    {
        return Err(Error::validation(format!(
            "Path contains disallowed character '{}'",
            bad
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::validation(format!("Path traversal detected in '{}'", text)));
    }

    if path.is_absolute() && !bases.iter().any(|base| path.starts_with(base)) {
        return Err(Error::validation(format!(
            "Path '{}' is outside the allowed directories",
            text
        )));
    }
    Ok(())
}

/// Check size bounds, parse as JSON then YAML, and require an OpenAPI/Swagger
/// discriminator plus a non-empty `info.title`.
pub fn validate_spec_content(content: &str, limits: &ContentLimits) -> Result<ValidatedSpec> {
    let size = content.len();
    if size < limits.min_bytes {
        return Err(Error::validation(format!(
            "Spec content is too small ({} bytes, minimum {})",
            size, limits.min_bytes
        )));
    }
    if size > limits.max_bytes {
        return Err(Error::validation(format!(
            "Spec content is too large ({} bytes, maximum {})",
            size, limits.max_bytes
        )));
    }

    let (document, format) = match serde_json::from_str::<Value>(content) {
        Ok(doc) => (doc, SpecFormat::Json),
        Err(_) => {
            let doc: Value = serde_yaml::from_str(content)
                .map_err(|e| Error::validation(format!("Spec is neither JSON nor YAML: {}", e)))?;
            (doc, SpecFormat::Yaml)
        }
    };

    let object = document
        .as_object()
        .ok_or_else(|| Error::validation("Spec must be an object"))?;

    if !object.contains_key("openapi") && !object.contains_key("swagger") {
        return Err(Error::validation(
            "Spec is missing an 'openapi' or 'swagger' version field",
        ));
    }

    let info = object
        .get("info")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::validation("Spec is missing an 'info' block"))?;
    let title = info
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::validation("Spec 'info.title' must be a non-empty string"))?
        .to_string();
    let description = info
        .get("description")
        .and_then(Value::as_str)
        .map(String::from);

    Ok(ValidatedSpec {
        document,
        format,
        title,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETSTORE: &str = r#"{"openapi":"3.0.0","info":{"title":"Petstore","version":"1.0.0"},"paths":{}}"#;

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("my api/v1"), "my_api_v1");
        assert_eq!(sanitize_segment("../../etc"), ".._.._etc");
        assert_eq!(sanitize_segment("ok-name_1.2"), "ok-name_1.2");
    }

    #[test]
    fn test_path_traversal_rejected() {
        let base = std::env::temp_dir();
        let bases = vec![base.clone()];
        assert!(validate_path_within(&base.join(".._.._etc/1.0.0.json"), &bases).is_err());
        assert!(validate_path_within(Path::new("~/secrets"), &bases).is_err());
        assert!(validate_path_within(Path::new("a/../b"), &bases).is_err());
    }

    #[test]
    fn test_absolute_path_must_be_under_base() {
        let base = std::env::temp_dir().join("op-catalog-test");
        let bases = vec![base.clone()];
        assert!(validate_path_within(&base.join("custom/pets/1.0.0.json"), &bases).is_ok());
        assert!(validate_path_within(Path::new("/etc/passwd"), &bases).is_err());
    }

    #[test]
    fn test_path_charset_and_length() {
        let bases = vec![];
        assert!(validate_path_within(Path::new("relative/ok.json"), &bases).is_ok());
        assert!(validate_path_within(Path::new("bad$name.json"), &bases).is_err());
        let long = "a".repeat(MAX_PATH_LENGTH + 1);
        assert!(validate_path_within(Path::new(&long), &bases).is_err());
    }

    #[test]
    fn test_validate_json_spec() {
        let spec = validate_spec_content(PETSTORE, &ContentLimits::default()).unwrap();
        assert_eq!(spec.format, SpecFormat::Json);
        assert_eq!(spec.title, "Petstore");
    }

    #[test]
    fn test_validate_yaml_spec() {
        let yaml = "swagger: '2.0'\ninfo:\n  title: Legacy\n  description: Old API\n  version: '1'\npaths: {}\n";
        let spec = validate_spec_content(yaml, &ContentLimits::default()).unwrap();
        assert_eq!(spec.format, SpecFormat::Yaml);
        assert_eq!(spec.title, "Legacy");
        assert_eq!(spec.description.as_deref(), Some("Old API"));
    }

    #[test]
    fn test_reject_bad_content() {
        let limits = ContentLimits::default();
        assert!(validate_spec_content("", &limits).is_err());
        assert!(validate_spec_content(r#"{"info":{"title":"No version"}}"#, &limits).is_err());
        assert!(validate_spec_content(r#"{"openapi":"3.0.0","info":{"title":""}}"#, &limits).is_err());

        let tight = ContentLimits { min_bytes: 1, max_bytes: 16 };
        assert!(validate_spec_content(PETSTORE, &tight).is_err());
    }

    #[test]
    fn test_name_version_required() {
        assert!(validate_name_version("", "1.0").is_err());
        assert!(validate_name_version("pets", " ").is_err());
        assert!(validate_name_version("pets", "1.0").is_ok());
    }
}
