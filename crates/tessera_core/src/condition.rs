//! Activation conditions.

use serde_json::Value;
use tessera_spec::ParameterSet;
use tracing::{debug, info};

use crate::error::{CoreResult, DefinitionError};
use crate::expr::{type_name, EvalContext};
use crate::instance::InstanceStore;
use crate::template::TemplateSet;

/// Marks instances whose condition evaluates false as skipped.
pub struct ConditionEvaluator<'a> {
    params: &'a ParameterSet,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(params: &'a ParameterSet) -> Self {
        Self { params }
    }

    /// Evaluate each instance's condition with its own loop binding.
    ///
    /// Returns the number of instances skipped.
    pub fn evaluate(&self, templates: &TemplateSet, store: &mut InstanceStore) -> CoreResult<usize> {
        let mut skipped = 0;

        for id in store.ids() {
            let Some(condition) = templates
                .get(&id.template)
                .and_then(|t| t.condition.as_ref())
            else {
                continue;
            };

            let instance = store.require(&id)?;
            let mut ctx = EvalContext::new(self.params);
            if let Some(binding) = &instance.binding {
                ctx = ctx.with_loop(binding.index, &binding.item);
            }

            let active = match condition.eval(&ctx) {
                Ok(Value::Bool(b)) => b,
                Ok(other) => {
                    return Err(DefinitionError::ConditionNotBoolean {
                        id: id.to_string(),
                        found: type_name(&other).to_string(),
                    }
                    .into())
                }
                Err(e) => {
                    return Err(DefinitionError::InvalidExpression {
                        id: id.to_string(),
                        field: "condition".to_string(),
                        message: e.to_string(),
                    }
                    .into())
                }
            };

            if !active {
                debug!("Condition false for {}, skipping", id);
                store.require_mut(&id)?.skip()?;
                skipped += 1;
            }
        }

        if skipped > 0 {
            info!("{} instance(s) skipped by condition", skipped);
        }
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::LoopExpander;
    use crate::instance::{InstanceId, InstanceState};
    use crate::registry::{KindRegistry, KindSpec};
    use crate::template::GraphBuilder;
    use crate::CoreError;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tessera_spec::ResourceDefinition;

    fn run(defs: &[ResourceDefinition], params: &ParameterSet) -> CoreResult<InstanceStore> {
        let registry = KindRegistry::new()
            .with(KindSpec::new("log_analytics_workspace"))
            .with(KindSpec::new("cosmos_sql_container"));
        let set = GraphBuilder::new(&registry).build(defs)?;
        let mut store = LoopExpander::new(params).expand(&set)?;
        ConditionEvaluator::new(params).evaluate(&set, &mut store)?;
        Ok(store)
    }

    fn params(analytics: Value) -> ParameterSet {
        let mut values = BTreeMap::new();
        values.insert("enableAnalytics".to_string(), analytics);
        values.insert(
            "containers".to_string(),
            json!([{"name": "orders", "enabled": true}, {"name": "audit", "enabled": false}]),
        );
        ParameterSet::from_values(values)
    }

    #[test]
    fn test_false_condition_skips() {
        let defs = [ResourceDefinition::new("analytics", "log_analytics_workspace")
            .condition(json!("{{ param.enableAnalytics }}"))];

        let store = run(&defs, &params(json!(false))).unwrap();
        assert_eq!(
            store.require(&InstanceId::scalar("analytics")).unwrap().state(),
            InstanceState::Skipped
        );

        let store = run(&defs, &params(json!(true))).unwrap();
        assert_eq!(
            store.require(&InstanceId::scalar("analytics")).unwrap().state(),
            InstanceState::Pending
        );
    }

    #[test]
    fn test_condition_per_loop_item() {
        let defs = [ResourceDefinition::new("containers", "cosmos_sql_container")
            .loop_over(json!("{{ param.containers }}"))
            .condition(json!("{{ item.enabled }}"))];

        let store = run(&defs, &params(json!(true))).unwrap();
        assert!(store.require(&InstanceId::indexed("containers", 0)).unwrap().is_active());
        assert!(!store.require(&InstanceId::indexed("containers", 1)).unwrap().is_active());
    }

    #[test]
    fn test_non_boolean_condition() {
        let defs = [ResourceDefinition::new("analytics", "log_analytics_workspace")
            .condition(json!("{{ param.enableAnalytics }}"))];

        let result = run(&defs, &params(json!("yes")));
        assert!(matches!(
            result,
            Err(CoreError::Definition(DefinitionError::ConditionNotBoolean { found, .. })) if found == "string"
        ));
    }
}
