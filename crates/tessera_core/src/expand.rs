//! Loop expansion: templates into concrete instances.

use std::collections::BTreeMap;

use tessera_spec::ParameterSet;
use tracing::debug;

use crate::error::{CoreResult, DefinitionError};
use crate::expr::{type_name, EvalContext, Expr};
use crate::instance::{Instance, InstanceId, InstanceStore, LoopBinding, ParamValue};
use crate::template::{Repetition, ResourceTemplate, TemplateSet};

/// Expands every template into its instances and binds static inputs.
pub struct LoopExpander<'a> {
    params: &'a ParameterSet,
}

impl<'a> LoopExpander<'a> {
    pub fn new(params: &'a ParameterSet) -> Self {
        Self { params }
    }

    /// A scalar template yields one instance without an index; a looped
    /// template yields one instance per element of its source, in order.
    /// An empty source yields none.
    pub fn expand(&self, templates: &TemplateSet) -> CoreResult<InstanceStore> {
        let mut store = InstanceStore::new();
        for template in templates.iter() {
            let instances = self.expand_template(template)?;
            debug!("Expanded {} into {} instance(s)", template.id, instances.len());
            for instance in instances {
                if !store.insert(instance) {
                    return Err(DefinitionError::DuplicateId(template.id.clone()).into());
                }
            }
        }
        Ok(store)
    }

    fn expand_template(&self, template: &ResourceTemplate) -> CoreResult<Vec<Instance>> {
        let ctx = EvalContext::new(self.params);
        match &template.repetition {
            Repetition::Scalar => {
                let params = bind_params(template, &template.id, &ctx)?;
                Ok(vec![
                    Instance::new(InstanceId::scalar(&template.id), &template.kind, template.scope.clone())
                        .with_params(params),
                ])
            }
            Repetition::Looped { source } => {
                let value = eval_source(template, source, &ctx)?;
                let items = match value {
                    serde_json::Value::Array(items) => items,
                    other => {
                        return Err(DefinitionError::LoopNotSequence {
                            id: template.id.clone(),
                            found: type_name(&other).to_string(),
                        }
                        .into())
                    }
                };

                let mut instances = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let id = InstanceId::indexed(&template.id, index);
                    let item_ctx = ctx.with_loop(index, &item);
                    let params = bind_params(template, &id.to_string(), &item_ctx)?;
                    let binding = LoopBinding {
                        index,
                        item: item.clone(),
                    };
                    instances.push(
                        Instance::new(id, &template.kind, template.scope.clone())
                            .with_params(params)
                            .with_binding(binding),
                    );
                }
                Ok(instances)
            }
        }
    }
}

fn eval_source(
    template: &ResourceTemplate,
    source: &Expr,
    ctx: &EvalContext<'_>,
) -> Result<serde_json::Value, DefinitionError> {
    source.eval(ctx).map_err(|e| DefinitionError::InvalidExpression {
        id: template.id.clone(),
        field: "loop".to_string(),
        message: e.to_string(),
    })
}

fn bind_params(
    template: &ResourceTemplate,
    owner: &str,
    ctx: &EvalContext<'_>,
) -> Result<BTreeMap<String, ParamValue>, DefinitionError> {
    let mut bound = BTreeMap::new();
    for (name, expr) in &template.params {
        let value = expr.bind(ctx).map_err(|e| DefinitionError::InvalidExpression {
            id: owner.to_string(),
            field: format!("params.{}", name),
            message: e.to_string(),
        })?;
        bound.insert(name.clone(), value);
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{KindRegistry, KindSpec};
    use crate::template::GraphBuilder;
    use serde_json::json;
    use tessera_spec::ResourceDefinition;

    fn templates(defs: &[ResourceDefinition]) -> TemplateSet {
        let registry = KindRegistry::new()
            .with(KindSpec::new("key_vault"))
            .with(KindSpec::new("cosmos_sql_container"));
        GraphBuilder::new(&registry).build(defs).unwrap()
    }

    fn params(containers: serde_json::Value) -> ParameterSet {
        let mut values = BTreeMap::new();
        values.insert("containers".to_string(), containers);
        values.insert("environment".to_string(), json!("dev"));
        ParameterSet::from_values(values)
    }

    fn containers() -> ResourceDefinition {
        ResourceDefinition::new("containers", "cosmos_sql_container")
            .loop_over(json!("{{ param.containers }}"))
            .param("name", json!("{{ item.name }}"))
            .param("position", json!("{{ index }}"))
    }

    #[test]
    fn test_scalar_yields_single_unindexed_instance() {
        let set = templates(&[ResourceDefinition::new("vault", "key_vault")
            .param("name", json!("kv-{{ param.environment }}"))]);
        let params = params(json!([]));
        let store = LoopExpander::new(&params).expand(&set).unwrap();

        assert_eq!(store.len(), 1);
        let vault = store.require(&InstanceId::scalar("vault")).unwrap();
        assert_eq!(vault.params["name"], ParamValue::Literal(json!("kv-dev")));
        assert!(vault.binding.is_none());
    }

    #[test]
    fn test_loop_binds_item_and_index() {
        let set = templates(&[containers()]);
        let params = params(json!([{"name": "orders"}, {"name": "users"}]));
        let store = LoopExpander::new(&params).expand(&set).unwrap();

        assert_eq!(store.len(), 2);
        let second = store.require(&InstanceId::indexed("containers", 1)).unwrap();
        assert_eq!(second.params["name"], ParamValue::Literal(json!("users")));
        assert_eq!(second.params["position"], ParamValue::Literal(json!(1)));
        assert_eq!(second.binding.as_ref().map(|b| b.index), Some(1));

        let names: Vec<String> = store.instances_of("containers").map(|i| i.id.to_string()).collect();
        assert_eq!(names, vec!["containers[0]", "containers[1]"]);
    }

    #[test]
    fn test_empty_loop_yields_nothing() {
        let set = templates(&[containers()]);
        let params = params(json!([]));
        let store = LoopExpander::new(&params).expand(&set).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_loop_source_must_be_sequence() {
        let set = templates(&[containers()]);
        let params = params(json!({"name": "orders"}));
        let result = LoopExpander::new(&params).expand(&set);
        assert!(matches!(
            result,
            Err(crate::CoreError::Definition(DefinitionError::LoopNotSequence { found, .. })) if found == "object"
        ));
    }

    #[test]
    fn test_unknown_parameter_is_definition_error() {
        let set = templates(&[ResourceDefinition::new("vault", "key_vault")
            .param("name", json!("{{ param.missing }}"))]);
        let params = params(json!([]));
        let result = LoopExpander::new(&params).expand(&set);
        assert!(matches!(
            result,
            Err(crate::CoreError::Definition(DefinitionError::InvalidExpression { .. }))
        ));
    }
}
