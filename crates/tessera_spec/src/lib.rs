//! # tessera_spec
//!
//! Template documents, readers and parameter layering for tessera.
//!
//! A template document declares global parameters, an ordered list of raw
//! resource definitions and document-level outputs. Documents are read from
//! YAML sources or pre-compiled JSON, either as a single file or a directory
//! of files merged in name order.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tessera_spec::{DocumentReader, Environment, ParameterSet};
//! use serde_json::json;
//!
//! let doc = DocumentReader::read("infra/main.yaml", false).unwrap();
//! let params = ParameterSet::builder(&doc.parameters)
//!     .overrides(vec!["enableAnalytics=true".parse().unwrap()])
//!     .set("environment", json!(Environment::Dev.as_str()))
//!     .build()
//!     .unwrap();
//! ```

pub mod error;
pub mod models;
pub mod params;
pub mod reader;

pub use error::{SpecError, SpecResult};
pub use models::*;
pub use params::{ParameterOverride, ParameterSet, ParameterSetBuilder, REDACTED};
pub use reader::{DocumentFormat, DocumentReader};
