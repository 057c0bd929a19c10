//! Catalog of the Azure resource kinds tessera can deploy.
//!
//! Each kind maps to a compiled ARM module `<modules_dir>/<kind>.json` and a
//! set of scopes it may be deployed at.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tessera_core::{KindRegistry, KindSpec, ScopeKind};
use tracing::{debug, warn};

use crate::error::{IacError, IacResult};

/// One deployable kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub kind: String,
    pub scopes: Vec<ScopeKind>,
    pub description: String,
}

impl CatalogEntry {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scopes: vec![ScopeKind::ResourceGroup],
            description: description.into(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<ScopeKind>) -> Self {
        self.scopes = scopes;
        self
    }

    /// File name of the compiled module.
    pub fn module_file(&self) -> String {
        format!("{}.json", self.kind)
    }
}

/// Kinds available for deployment, with their module location.
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    modules_dir: PathBuf,
    entries: BTreeMap<String, CatalogEntry>,
}

impl ModuleCatalog {
    /// An empty catalog reading modules from `modules_dir`.
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            entries: BTreeMap::new(),
        }
    }

    /// The built-in Azure data-platform kinds.
    pub fn azure(modules_dir: impl Into<PathBuf>) -> Self {
        Self::new(modules_dir)
            .with(CatalogEntry::new("key_vault", "Azure Key Vault"))
            .with(CatalogEntry::new("cosmos_account", "Cosmos DB account"))
            .with(CatalogEntry::new("cosmos_sql_database", "Cosmos DB SQL database"))
            .with(CatalogEntry::new("cosmos_sql_container", "Cosmos DB SQL container"))
            .with(
                CatalogEntry::new("role_assignment", "Role assignment")
                    .with_scopes(vec![ScopeKind::ResourceGroup, ScopeKind::Subscription]),
            )
            .with(CatalogEntry::new("log_analytics_workspace", "Log Analytics workspace"))
    }

    pub fn with(mut self, entry: CatalogEntry) -> Self {
        self.register(entry);
        self
    }

    pub fn register(&mut self, entry: CatalogEntry) {
        debug!("Registering kind: {}", entry.kind);
        self.entries.insert(entry.kind.clone(), entry);
    }

    pub fn get(&self, kind: &str) -> Option<&CatalogEntry> {
        self.entries.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Path of the compiled module for a kind.
    pub fn module_path(&self, kind: &str) -> IacResult<PathBuf> {
        let entry = self
            .get(kind)
            .ok_or_else(|| IacError::UnknownKind(kind.to_string()))?;
        Ok(self.modules_dir.join(entry.module_file()))
    }

    /// Kinds whose module file is missing on disk.
    pub fn missing_modules(&self) -> Vec<IacError> {
        self.entries
            .values()
            .filter_map(|entry| {
                let path = self.modules_dir.join(entry.module_file());
                if path.is_file() {
                    None
                } else {
                    warn!("Module for '{}' missing at {:?}", entry.kind, path);
                    Some(IacError::ModuleNotFound {
                        kind: entry.kind.clone(),
                        path,
                    })
                }
            })
            .collect()
    }

    /// Kind registry for the graph builder.
    pub fn registry(&self) -> KindRegistry {
        self.entries.values().fold(KindRegistry::new(), |registry, entry| {
            registry.with(
                KindSpec::new(entry.kind.clone())
                    .with_scopes(entry.scopes.clone())
                    .with_description(entry.description.clone()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Scope;

    #[test]
    fn test_azure_catalog() {
        let catalog = ModuleCatalog::azure("modules");
        assert_eq!(catalog.kinds().len(), 6);
        assert_eq!(
            catalog.module_path("key_vault").unwrap(),
            PathBuf::from("modules/key_vault.json")
        );
        assert!(matches!(
            catalog.module_path("storage_account"),
            Err(IacError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_registry_scopes() {
        let registry = ModuleCatalog::azure("modules").registry();
        assert_eq!(registry.len(), 6);
        assert_eq!(
            registry.resolve_scope("role_assignment", Some("subscription")),
            Some(Scope::Subscription)
        );
        assert_eq!(registry.resolve_scope("key_vault", Some("subscription")), None);
    }

    #[test]
    fn test_missing_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("key_vault.json"), "{}").unwrap();

        let catalog = ModuleCatalog::new(dir.path())
            .with(CatalogEntry::new("key_vault", "vault"))
            .with(CatalogEntry::new("cosmos_account", "account"));

        let missing = catalog.missing_modules();
        assert_eq!(missing.len(), 1);
        assert!(matches!(&missing[0], IacError::ModuleNotFound { kind, .. } if kind == "cosmos_account"));
    }
}
