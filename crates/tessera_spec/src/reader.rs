//! Template document and parameter file reading.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{SpecError, SpecResult};
use crate::models::{Environment, TemplateDocument};

/// On-disk format of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    /// Pre-compiled JSON
    Json,
}

impl DocumentFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(DocumentFormat::Yaml),
            Some("json") => Some(DocumentFormat::Json),
            _ => None,
        }
    }
}

/// Reader for template documents and parameter files.
pub struct DocumentReader;

impl DocumentReader {
    /// Read a template from a file or a directory of files.
    ///
    /// With `precompiled` set, only JSON input is accepted.
    pub fn read(path: impl AsRef<Path>, precompiled: bool) -> SpecResult<TemplateDocument> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SpecError::NotFound(path.to_path_buf()));
        }

        if path.is_dir() {
            return Self::read_dir(path, precompiled);
        }

        let format = Self::format_for(path, precompiled)?;
        Self::read_file(path, format)
    }

    /// Read a single document file.
    pub fn read_file(path: impl AsRef<Path>, format: DocumentFormat) -> SpecResult<TemplateDocument> {
        let path = path.as_ref();
        debug!("Reading template document from {:?}", path);

        let content = fs::read_to_string(path)?;
        Self::parse(&content, format).map_err(|e| SpecError::InvalidFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parse document content.
    pub fn parse(content: &str, format: DocumentFormat) -> SpecResult<TemplateDocument> {
        let document = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
            DocumentFormat::Json => serde_json::from_str(content)?,
        };
        Ok(document)
    }

    /// Read every document file directly inside a directory, merged in file-name order.
    pub fn read_dir(dir: &Path, precompiled: bool) -> SpecResult<TemplateDocument> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file())
            .filter(|p| match DocumentFormat::from_path(p) {
                Some(DocumentFormat::Json) => true,
                Some(DocumentFormat::Yaml) => !precompiled,
                None => false,
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SpecError::NotFound(dir.to_path_buf()));
        }

        let mut document = TemplateDocument::new();
        for file in files {
            let format = Self::format_for(&file, precompiled)?;
            document.merge(Self::read_file(&file, format)?)?;
        }

        debug!(
            "Merged {} resources from template directory {:?}",
            document.resources.len(),
            dir
        );
        Ok(document)
    }

    /// Read a parameter file into a flat name/value map.
    ///
    /// Both a plain map and the ARM layout
    /// (`{"parameters": {"name": {"value": ...}}}`) are accepted.
    pub fn read_parameter_file(path: impl AsRef<Path>) -> SpecResult<BTreeMap<String, Value>> {
        let path = path.as_ref();
        debug!("Reading parameter file from {:?}", path);

        if !path.exists() {
            return Err(SpecError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let raw: Value = match DocumentFormat::from_path(path) {
            Some(DocumentFormat::Json) => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };

        let map = match raw {
            Value::Object(map) => map,
            Value::Null => return Ok(BTreeMap::new()),
            _ => {
                return Err(SpecError::InvalidFormat {
                    path: path.to_path_buf(),
                    message: "parameter file must contain a mapping".to_string(),
                })
            }
        };

        let entries = match map.get("parameters") {
            Some(Value::Object(inner)) => inner.clone(),
            _ => map,
        };

        Ok(entries
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::Object(mut obj) if obj.len() == 1 && obj.contains_key("value") => {
                        obj.remove("value").unwrap_or(Value::Null)
                    }
                    other => other,
                };
                (name, value)
            })
            .collect())
    }

    /// Locate the conventional parameter file for an environment.
    ///
    /// Looks for `parameters/<env>.yaml`, `.yml` or `.json` next to the template.
    pub fn find_parameter_file(template_path: &Path, env: Environment) -> Option<PathBuf> {
        let base = if template_path.is_dir() {
            template_path.to_path_buf()
        } else {
            template_path.parent()?.to_path_buf()
        };

        ["yaml", "yml", "json"]
            .iter()
            .map(|ext| base.join("parameters").join(format!("{}.{}", env.as_str(), ext)))
            .find(|candidate| candidate.is_file())
    }

    fn format_for(path: &Path, precompiled: bool) -> SpecResult<DocumentFormat> {
        match (DocumentFormat::from_path(path), precompiled) {
            (Some(DocumentFormat::Json), _) => Ok(DocumentFormat::Json),
            (Some(DocumentFormat::Yaml), false) => Ok(DocumentFormat::Yaml),
            (Some(DocumentFormat::Yaml), true) => Err(SpecError::InvalidFormat {
                path: path.to_path_buf(),
                message: "pre-compiled templates must be JSON".to_string(),
            }),
            (None, _) => Err(SpecError::InvalidFormat {
                path: path.to_path_buf(),
                message: "unsupported file extension".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_parse_yaml_document() {
        let content = r#"
name: sample
parameters:
  environment: { type: string, allowed: [dev, test, prod] }
resources:
  - id: vault
    kind: key_vault
    params:
      name: "kv-{{ param.environment }}"
    outputs: [name]
"#;
        let doc = DocumentReader::parse(content, DocumentFormat::Yaml).unwrap();
        assert_eq!(doc.name.as_deref(), Some("sample"));
        assert_eq!(doc.resources.len(), 1);
        assert_eq!(doc.parameters["environment"].allowed.len(), 3);
    }

    #[test]
    fn test_precompiled_rejects_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.yaml");
        fs::write(&path, "resources: []").unwrap();

        let result = DocumentReader::read(&path, true);
        assert!(matches!(result, Err(SpecError::InvalidFormat { .. })));
    }

    #[test]
    fn test_read_arm_parameter_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.json");
        fs::write(
            &path,
            r#"{"parameters": {"enableAnalytics": {"value": true}, "sku": {"value": "S1"}}}"#,
        )
        .unwrap();

        let values = DocumentReader::read_parameter_file(&path).unwrap();
        assert_eq!(values["enableAnalytics"], json!(true));
        assert_eq!(values["sku"], json!("S1"));
    }

    #[test]
    fn test_find_parameter_file() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("main.yaml");
        fs::write(&template, "resources: []").unwrap();
        fs::create_dir_all(dir.path().join("parameters")).unwrap();
        fs::write(dir.path().join("parameters").join("test.yaml"), "a: 1").unwrap();

        assert!(DocumentReader::find_parameter_file(&template, Environment::Test).is_some());
        assert!(DocumentReader::find_parameter_file(&template, Environment::Prod).is_none());
    }
}
