//! Reference resolution and dependency edges.
//!
//! Every reference inside an active instance's parameters is pinned to a
//! concrete instance and produces an implicit edge. A reference to a looped
//! template without an index stands for the whole collection and becomes a
//! list with one entry per instance. References to skipped instances resolve
//! to null and produce no edge.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreResult, DefinitionError};
use crate::instance::{InstanceId, InstanceStore, ParamValue, Reference};
use crate::template::TemplateSet;

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Declared with `depends_on`
    Explicit,
    /// Derived from a reference
    Implicit,
}

/// `from` must not start until `to` has completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DependencyEdge {
    pub from: InstanceId,
    pub to: InstanceId,
    pub kind: EdgeKind,
}

impl DependencyEdge {
    pub fn new(from: InstanceId, to: InstanceId, kind: EdgeKind) -> Self {
        Self { from, to, kind }
    }
}

/// Pins references to instances and derives dependency edges.
pub struct ReferenceResolver<'a> {
    templates: &'a TemplateSet,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(templates: &'a TemplateSet) -> Self {
        Self { templates }
    }

    /// Resolve every active instance, returning the sorted edge list.
    ///
    /// Explicit dependencies fan out to every active instance of the named
    /// template.
    pub fn resolve(&self, store: &mut InstanceStore) -> CoreResult<Vec<DependencyEdge>> {
        let mut edges = BTreeSet::new();

        for id in store.active_ids() {
            if let Some(template) = self.templates.get(&id.template) {
                for dependency in &template.depends_on {
                    for target in store.instances_of(dependency).filter(|i| i.is_active()) {
                        edges.insert(DependencyEdge::new(
                            id.clone(),
                            target.id.clone(),
                            EdgeKind::Explicit,
                        ));
                    }
                }
            }

            let params = std::mem::take(&mut store.require_mut(&id)?.params);
            let mut resolved = std::collections::BTreeMap::new();
            let mut targets = BTreeSet::new();
            for (name, value) in params {
                let (value, found) = self.resolve_value(&id.to_string(), value, store)?;
                targets.extend(found);
                resolved.insert(name, value);
            }
            store.require_mut(&id)?.params = resolved;

            for target in targets {
                edges.insert(DependencyEdge::new(id.clone(), target, EdgeKind::Implicit));
            }
        }

        debug!("Resolved {} dependency edge(s)", edges.len());
        Ok(edges.into_iter().collect())
    }

    /// Pin the references inside one value.
    ///
    /// Returns the rewritten value and the active instances it now depends on.
    pub fn resolve_value(
        &self,
        owner: &str,
        value: ParamValue,
        store: &InstanceStore,
    ) -> CoreResult<(ParamValue, BTreeSet<InstanceId>)> {
        let mut targets = BTreeSet::new();
        let value = value.try_map_references(&mut |reference: Reference| {
            self.pin(owner, reference, store, &mut targets)
        })?;
        Ok((value, targets))
    }

    fn pin(
        &self,
        owner: &str,
        reference: Reference,
        store: &InstanceStore,
        targets: &mut BTreeSet<InstanceId>,
    ) -> Result<ParamValue, DefinitionError> {
        let template_id = &reference.target.template;
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| DefinitionError::UnknownReference {
                id: owner.to_string(),
                target: template_id.clone(),
            })?;

        let mut link = |target: InstanceId| -> ParamValue {
            match store.get(&target) {
                Some(instance) if instance.is_active() => {
                    targets.insert(target.clone());
                    ParamValue::Reference(Reference::new(target, reference.output.clone()))
                }
                _ => ParamValue::Literal(Value::Null),
            }
        };

        match (template.is_looped(), reference.target.index) {
            (false, Some(_)) => Err(DefinitionError::IndexOnScalar {
                id: owner.to_string(),
                target: template_id.clone(),
            }),
            (false, None) => Ok(link(InstanceId::scalar(template_id))),
            (true, Some(index)) => {
                let len = store.instances_of(template_id).count();
                if index >= len {
                    return Err(DefinitionError::IndexOutOfRange {
                        id: owner.to_string(),
                        target: template_id.clone(),
                        index,
                        len,
                    });
                }
                Ok(link(InstanceId::indexed(template_id, index)))
            }
            (true, None) => {
                let members: Vec<InstanceId> = store
                    .instances_of(template_id)
                    .map(|i| i.id.clone())
                    .collect();
                Ok(ParamValue::List(members.into_iter().map(link).collect()))
            }
        }
    }
}
