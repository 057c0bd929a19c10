//! Registry of the resource kinds the engine can provision.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Kind of deployment scope, without a concrete target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    ResourceGroup,
    Subscription,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::ResourceGroup => "resource_group",
            ScopeKind::Subscription => "subscription",
        }
    }
}

/// Deployment scope of an instance.
///
/// Written as `resource_group`, `resource_group:<name>` or `subscription`.
/// A resource group without a name targets the run's default group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    ResourceGroup(Option<String>),
    Subscription,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::ResourceGroup(None)
    }
}

impl Scope {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s {
            "resource_group" => Some(Scope::ResourceGroup(None)),
            "subscription" => Some(Scope::Subscription),
            _ => {
                let name = s.strip_prefix("resource_group:")?.trim();
                if name.is_empty() {
                    None
                } else {
                    Some(Scope::ResourceGroup(Some(name.to_string())))
                }
            }
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::ResourceGroup(_) => ScopeKind::ResourceGroup,
            Scope::Subscription => ScopeKind::Subscription,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::ResourceGroup(Some(name)) => write!(f, "resource_group:{}", name),
            other => write!(f, "{}", other.kind().as_str()),
        }
    }
}

/// Description of a provisionable kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindSpec {
    pub kind: String,
    pub scopes: Vec<ScopeKind>,
    pub description: Option<String>,
}

impl KindSpec {
    /// A kind deployable to resource groups only.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scopes: vec![ScopeKind::ResourceGroup],
            description: None,
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<ScopeKind>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn supports(&self, scope: ScopeKind) -> bool {
        self.scopes.contains(&scope)
    }
}

/// A registry of known resource kinds.
///
/// The graph builder rejects templates whose kind is not registered here or
/// whose scope the kind cannot be deployed to.
#[derive(Default, Clone)]
pub struct KindRegistry {
    kinds: HashMap<String, KindSpec>,
}

impl KindRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register a kind. An existing entry with the same name is replaced.
    pub fn register(&mut self, spec: KindSpec) {
        debug!("Registering resource kind: {}", spec.kind);
        self.kinds.insert(spec.kind.clone(), spec);
    }

    /// Builder-style registration.
    pub fn with(mut self, spec: KindSpec) -> Self {
        self.register(spec);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&KindSpec> {
        self.kinds.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// All registered kind names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Resolve a declared scope for a kind; `None` when it cannot be used.
    pub fn resolve_scope(&self, kind: &str, declared: Option<&str>) -> Option<Scope> {
        let spec = self.get(kind)?;
        let scope = match declared {
            Some(raw) => Scope::parse(raw)?,
            None => Scope::default(),
        };
        spec.supports(scope.kind()).then_some(scope)
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.names())
            .finish()
    }
}
