//! Typed resource templates and the graph builder.
//!
//! The builder takes raw resource definitions, checks them against the kind
//! registry and against each other, and produces a [`TemplateSet`] with all
//! expressions parsed. Nothing here looks at parameter values; that happens
//! during expansion.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tessera_spec::ResourceDefinition;
use tracing::{debug, info};

use crate::error::DefinitionError;
use crate::expr::{Expr, ExprError};
use crate::registry::{KindRegistry, Scope};

/// Whether a template yields one instance or one per loop element.
#[derive(Debug, Clone, PartialEq)]
pub enum Repetition {
    Scalar,
    Looped { source: Expr },
}

/// A validated resource template.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTemplate {
    pub id: String,
    pub kind: String,
    pub scope: Scope,
    pub params: BTreeMap<String, Expr>,
    pub repetition: Repetition,
    pub condition: Option<Expr>,
    pub depends_on: Vec<String>,
    pub outputs: Vec<String>,
}

impl ResourceTemplate {
    pub fn is_looped(&self) -> bool {
        matches!(self.repetition, Repetition::Looped { .. })
    }

    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}

/// Templates in document order, addressable by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<ResourceTemplate>,
    index: HashMap<String, usize>,
}

impl TemplateSet {
    fn push(&mut self, template: ResourceTemplate) {
        self.index.insert(template.id.clone(), self.templates.len());
        self.templates.push(template);
    }

    pub fn get(&self, id: &str) -> Option<&ResourceTemplate> {
        self.index.get(id).map(|&i| &self.templates[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid id pattern"))
}

/// Builds a [`TemplateSet`] from raw definitions.
pub struct GraphBuilder<'a> {
    registry: &'a KindRegistry,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a KindRegistry) -> Self {
        Self { registry }
    }

    /// Validate and type the definitions.
    ///
    /// Fails on duplicate ids, unknown kinds, unresolvable scopes, unknown
    /// explicit dependencies, references to unknown templates or undeclared
    /// outputs, and references inside loop sources or conditions.
    pub fn build(&self, definitions: &[ResourceDefinition]) -> Result<TemplateSet, DefinitionError> {
        let mut set = TemplateSet::default();

        for definition in definitions {
            if !id_pattern().is_match(&definition.id) {
                return Err(DefinitionError::InvalidId(definition.id.clone()));
            }
            if set.contains(&definition.id) {
                return Err(DefinitionError::DuplicateId(definition.id.clone()));
            }
            set.push(self.build_template(definition)?);
        }

        for template in set.iter() {
            Self::check_links(template, &set)?;
        }

        info!("Built {} resource template(s)", set.len());
        Ok(set)
    }

    fn build_template(&self, definition: &ResourceDefinition) -> Result<ResourceTemplate, DefinitionError> {
        let id = &definition.id;
        if !self.registry.contains(&definition.kind) {
            return Err(DefinitionError::UnknownKind {
                id: id.clone(),
                kind: definition.kind.clone(),
            });
        }

        let scope = self
            .registry
            .resolve_scope(&definition.kind, definition.scope.as_deref())
            .ok_or_else(|| DefinitionError::UnresolvableScope {
                id: id.clone(),
                scope: definition
                    .scope
                    .clone()
                    .unwrap_or_else(|| Scope::default().to_string()),
                kind: definition.kind.clone(),
            })?;

        let mut params = BTreeMap::new();
        for (name, raw) in &definition.params {
            params.insert(name.clone(), parse_field(id, &format!("params.{}", name), raw)?);
        }

        let repetition = match &definition.loop_source {
            Some(raw) => Repetition::Looped {
                source: parse_static(id, "loop", raw)?,
            },
            None => Repetition::Scalar,
        };

        let condition = match &definition.condition {
            Some(raw) => Some(parse_static(id, "condition", raw)?),
            None => None,
        };

        debug!(
            "Template {} ({}): {} param(s), looped: {}",
            id,
            definition.kind,
            params.len(),
            definition.loop_source.is_some()
        );

        Ok(ResourceTemplate {
            id: id.clone(),
            kind: definition.kind.clone(),
            scope,
            params,
            repetition,
            condition,
            depends_on: definition.depends_on.clone(),
            outputs: definition.outputs.clone(),
        })
    }

    fn check_links(template: &ResourceTemplate, set: &TemplateSet) -> Result<(), DefinitionError> {
        for dependency in &template.depends_on {
            if !set.contains(dependency) {
                return Err(DefinitionError::UnknownDependency {
                    id: template.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        for expr in template.params.values() {
            check_refs(&template.id, expr, set)?;
        }
        Ok(())
    }

    /// Parse document-level output expressions.
    pub fn build_outputs(
        &self,
        outputs: &BTreeMap<String, Value>,
        set: &TemplateSet,
    ) -> Result<BTreeMap<String, Expr>, DefinitionError> {
        let mut parsed = BTreeMap::new();
        for (name, raw) in outputs {
            let expr = parse_field("outputs", name, raw)?;
            check_refs("outputs", &expr, set)?;
            parsed.insert(name.clone(), expr);
        }
        Ok(parsed)
    }
}

fn parse_field(id: &str, field: &str, raw: &Value) -> Result<Expr, DefinitionError> {
    Expr::parse(raw).map_err(|e| invalid(id, field, e))
}

fn parse_static(id: &str, field: &str, raw: &Value) -> Result<Expr, DefinitionError> {
    let expr = parse_field(id, field, raw)?;
    if let Some(r) = expr.refs().first() {
        return Err(invalid(id, field, ExprError::NonStatic(r.to_string())));
    }
    Ok(expr)
}

fn check_refs(owner: &str, expr: &Expr, set: &TemplateSet) -> Result<(), DefinitionError> {
    for r in expr.refs() {
        let target = set
            .get(&r.resource)
            .ok_or_else(|| DefinitionError::UnknownReference {
                id: owner.to_string(),
                target: r.resource.clone(),
            })?;
        if !target.declares_output(&r.output) {
            return Err(DefinitionError::UnknownOutput {
                id: owner.to_string(),
                target: r.resource.clone(),
                output: r.output.clone(),
            });
        }
        if r.index.is_some() && !target.is_looped() {
            return Err(DefinitionError::IndexOnScalar {
                id: owner.to_string(),
                target: r.resource.clone(),
            });
        }
    }
    Ok(())
}

fn invalid(id: &str, field: &str, error: ExprError) -> DefinitionError {
    DefinitionError::InvalidExpression {
        id: id.to_string(),
        field: field.to_string(),
        message: error.to_string(),
    }
}
