use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::sequence::{InputBinding, SequenceStep};

/// A reference named a key with no value in the frozen context. This is
/// step-local: the plan already proved the key belongs to an earlier
/// group, so the producer must have failed or been skipped.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("step {step_order} ({skill_key}) found no value for referenced key `{referenced_key}`")]
pub struct UnresolvedInputError {
    pub step_order: u32,
    pub skill_key: String,
    pub referenced_key: String,
}

/// Accumulated outputs for one run, keyed by `output_key`. Groups read a
/// clone frozen at group start, so siblings never observe each other.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_initial(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Records a completed step's output under its `output_key`.
    pub fn insert_output(&mut self, output_key: &str, output: Value) {
        self.values.insert(output_key.to_string(), output);
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Materializes the input object for one step from its bindings.
    /// Literals pass through unchanged; references read this context.
    pub fn resolve_inputs(&self, step: &SequenceStep) -> Result<Value, UnresolvedInputError> {
        let mut inputs = Map::with_capacity(step.input_bindings.len());

        for (input_key, binding) in &step.input_bindings {
            let value = match binding {
                InputBinding::Literal { value } => value.clone(),
                InputBinding::Reference { key } => match self.values.get(key) {
                    Some(value) => value.clone(),
                    None => {
                        return Err(UnresolvedInputError {
                            step_order: step.step_order,
                            skill_key: step.skill_key.0.clone(),
                            referenced_key: key.clone(),
                        });
                    }
                },
            };
            inputs.insert(input_key.clone(), value);
        }

        Ok(Value::Object(inputs))
    }
}
