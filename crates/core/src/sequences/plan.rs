use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::catalog::SkillCatalog;
use crate::domain::sequence::{ExecutionMode, InputBinding, Sequence, SequenceStep};

/// Rejected sequence definitions never produce a job. Everything here is
/// detectable before the first skill is dispatched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SequenceValidationError {
    #[error("step {step_order} references unknown skill `{skill_key}`")]
    UnknownSkill { step_order: u32, skill_key: String },
    #[error("step orders must be contiguous starting at 1, found {found} at position {position}")]
    NonContiguousOrder { position: usize, found: u32 },
    #[error("output key `{output_key}` is declared by steps {first_order} and {duplicate_order}")]
    DuplicateOutputKey { output_key: String, first_order: u32, duplicate_order: u32 },
    #[error("step {step_order} is missing a binding for required input `{input_key}`")]
    MissingRequiredInput { step_order: u32, input_key: String },
    #[error(
        "step {step_order} references `{referenced_key}` produced by step {sibling_order} in the \
         same parallel group"
    )]
    SiblingReference { step_order: u32, referenced_key: String, sibling_order: u32 },
    #[error(
        "step {step_order} references `{referenced_key}` which no earlier group or initial \
         context provides"
    )]
    UnresolvableReference { step_order: u32, referenced_key: String },
    #[error("step {step_order} mixes execution mode {mode:?} with parallel_group {group:?}")]
    InconsistentExecutionMode { step_order: u32, mode: ExecutionMode, group: Option<u32> },
}

/// Steps that dispatch together. A singleton group holds one sequential
/// step; a parallel group holds a contiguous run of steps sharing the
/// same `parallel_group` id.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionGroup {
    pub parallel_group: Option<u32>,
    pub steps: Vec<SequenceStep>,
}

impl ExecutionGroup {
    pub fn is_parallel(&self) -> bool {
        self.parallel_group.is_some() && self.steps.len() > 1
    }

    pub fn first_step_order(&self) -> Option<u32> {
        self.steps.first().map(|step| step.step_order)
    }
}

/// Validated dispatch order for one run. Group order follows step order;
/// members of one group run concurrently against a context frozen at
/// group start.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
}

impl ExecutionPlan {
    /// Validates the sequence against the catalog and the run's initial
    /// context, then partitions it into execution groups.
    ///
    /// References are legal when they name an initial-context key or the
    /// `output_key` of a step in a strictly earlier group. Whether the
    /// referenced value actually materializes is a dispatch-time concern.
    pub fn build(
        sequence: &Sequence,
        catalog: &SkillCatalog,
        initial_context: &Map<String, Value>,
    ) -> Result<Self, SequenceValidationError> {
        validate_orders(&sequence.steps)?;
        validate_modes(&sequence.steps)?;
        validate_skills(&sequence.steps, catalog)?;
        validate_output_keys(&sequence.steps)?;

        let groups = partition_groups(&sequence.steps);
        validate_references(&groups, initial_context)?;

        Ok(Self { groups })
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.groups.iter().map(|group| group.steps.len()).sum()
    }
}

fn validate_orders(steps: &[SequenceStep]) -> Result<(), SequenceValidationError> {
    for (position, step) in steps.iter().enumerate() {
        let expected = (position + 1) as u32;
        if step.step_order != expected {
            return Err(SequenceValidationError::NonContiguousOrder {
                position,
                found: step.step_order,
            });
        }
    }
    Ok(())
}

fn validate_modes(steps: &[SequenceStep]) -> Result<(), SequenceValidationError> {
    for step in steps {
        let consistent = match step.execution_mode {
            ExecutionMode::Parallel => step.parallel_group.is_some(),
            ExecutionMode::Sequential => step.parallel_group.is_none(),
        };
        if !consistent {
            return Err(SequenceValidationError::InconsistentExecutionMode {
                step_order: step.step_order,
                mode: step.execution_mode,
                group: step.parallel_group,
            });
        }
    }
    Ok(())
}

fn validate_skills(
    steps: &[SequenceStep],
    catalog: &SkillCatalog,
) -> Result<(), SequenceValidationError> {
    for step in steps {
        let Some(skill) = catalog.get(&step.skill_key) else {
            return Err(SequenceValidationError::UnknownSkill {
                step_order: step.step_order,
                skill_key: step.skill_key.0.clone(),
            });
        };

        for input_key in &skill.required_inputs {
            if step.binding_for(input_key).is_none() {
                return Err(SequenceValidationError::MissingRequiredInput {
                    step_order: step.step_order,
                    input_key: input_key.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_output_keys(steps: &[SequenceStep]) -> Result<(), SequenceValidationError> {
    let mut seen: HashMap<&str, u32> = HashMap::new();
    for step in steps {
        if let Some(first_order) = seen.insert(step.output_key.as_str(), step.step_order) {
            return Err(SequenceValidationError::DuplicateOutputKey {
                output_key: step.output_key.clone(),
                first_order,
                duplicate_order: step.step_order,
            });
        }
    }
    Ok(())
}

fn partition_groups(steps: &[SequenceStep]) -> Vec<ExecutionGroup> {
    let mut groups: Vec<ExecutionGroup> = Vec::new();

    for step in steps {
        match step.parallel_group {
            Some(group_id) => {
                let joins_previous = groups
                    .last()
                    .is_some_and(|group| group.parallel_group == Some(group_id));
                if joins_previous {
                    if let Some(group) = groups.last_mut() {
                        group.steps.push(step.clone());
                    }
                } else {
                    groups.push(ExecutionGroup {
                        parallel_group: Some(group_id),
                        steps: vec![step.clone()],
                    });
                }
            }
            None => {
                groups.push(ExecutionGroup { parallel_group: None, steps: vec![step.clone()] });
            }
        }
    }

    groups
}

fn validate_references(
    groups: &[ExecutionGroup],
    initial_context: &Map<String, Value>,
) -> Result<(), SequenceValidationError> {
    // Keys resolvable by the group currently being checked: the initial
    // context plus output keys of strictly earlier groups.
    let mut resolvable: BTreeSet<String> = initial_context.keys().cloned().collect();

    for group in groups {
        let sibling_outputs: HashMap<&str, u32> = group
            .steps
            .iter()
            .map(|step| (step.output_key.as_str(), step.step_order))
            .collect();

        for step in &group.steps {
            for (_, binding) in &step.input_bindings {
                let InputBinding::Reference { key } = binding else {
                    continue;
                };
                if resolvable.contains(key) {
                    continue;
                }
                if let Some(sibling_order) = sibling_outputs.get(key.as_str()) {
                    if *sibling_order != step.step_order {
                        return Err(SequenceValidationError::SiblingReference {
                            step_order: step.step_order,
                            referenced_key: key.clone(),
                            sibling_order: *sibling_order,
                        });
                    }
                }
                return Err(SequenceValidationError::UnresolvableReference {
                    step_order: step.step_order,
                    referenced_key: key.clone(),
                });
            }
        }

        for step in &group.steps {
            resolvable.insert(step.output_key.clone());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::{ExecutionPlan, SequenceValidationError};
    use crate::catalog::SkillCatalog;
    use crate::domain::sequence::{
        ExecutionMode, InputBinding, OnFailure, Sequence, SequenceKey, SequenceStep,
    };
    use crate::domain::skill::SkillKey;

    fn step(order: u32, skill: &str, output_key: &str) -> SequenceStep {
        SequenceStep {
            step_order: order,
            skill_key: SkillKey(skill.to_string()),
            input_bindings: vec![(
                "lead_id".to_string(),
                InputBinding::Literal { value: json!("L-100") },
            )],
            output_key: output_key.to_string(),
            on_failure: OnFailure::Stop,
            execution_mode: ExecutionMode::Sequential,
            parallel_group: None,
        }
    }

    fn parallel(mut step: SequenceStep, group: u32) -> SequenceStep {
        step.execution_mode = ExecutionMode::Parallel;
        step.parallel_group = Some(group);
        step
    }

    fn sequence(steps: Vec<SequenceStep>) -> Sequence {
        Sequence::new(SequenceKey("lead_followup".to_string()), "Lead Follow-up", steps)
    }

    fn empty_context() -> Map<String, serde_json::Value> {
        Map::new()
    }

    #[test]
    fn contiguous_parallel_steps_collapse_into_one_group() {
        let catalog = SkillCatalog::builtin();
        let steps = vec![
            step(1, "enrich_lead", "profile"),
            parallel(step(2, "schedule_call", "slot"), 1),
            parallel(step(3, "log_activity_note", "note_ref"), 1),
            step(4, "enrich_lead", "profile_refresh"),
        ];
        let mut steps = steps;
        steps[2].input_bindings =
            vec![("lead_id".to_string(), InputBinding::Literal { value: json!("L-100") }), (
                "note".to_string(),
                InputBinding::Literal { value: json!("called") },
            )];

        let plan = ExecutionPlan::build(&sequence(steps), &catalog, &empty_context())
            .expect("plan should validate");

        assert_eq!(plan.groups.len(), 3);
        assert!(!plan.groups[0].is_parallel());
        assert!(plan.groups[1].is_parallel());
        assert_eq!(plan.groups[1].steps.len(), 2);
        assert_eq!(plan.groups[1].first_step_order(), Some(2));
        assert_eq!(plan.step_count(), 4);
    }

    #[test]
    fn same_group_id_separated_by_sequential_step_forms_two_groups() {
        let catalog = SkillCatalog::builtin();
        let mut note = step(4, "log_activity_note", "late_note");
        note.input_bindings.push((
            "note".to_string(),
            InputBinding::Literal { value: json!("recap") },
        ));
        let steps = vec![
            parallel(step(1, "enrich_lead", "profile"), 1),
            parallel(step(2, "schedule_call", "slot"), 1),
            step(3, "enrich_lead", "profile_refresh"),
            parallel(note, 1),
        ];

        let plan = ExecutionPlan::build(&sequence(steps), &catalog, &empty_context())
            .expect("plan should validate");

        assert_eq!(plan.groups.len(), 3);
        assert_eq!(plan.groups[0].steps.len(), 2);
        assert_eq!(plan.groups[2].steps.len(), 1);
        assert!(!plan.groups[2].is_parallel());
    }

    #[test]
    fn unknown_skill_is_rejected_before_any_group_forms() {
        let catalog = SkillCatalog::builtin();
        let steps = vec![step(1, "send_carrier_pigeon", "pigeon_receipt")];

        let error = ExecutionPlan::build(&sequence(steps), &catalog, &empty_context())
            .expect_err("unknown skill should fail validation");

        assert_eq!(
            error,
            SequenceValidationError::UnknownSkill {
                step_order: 1,
                skill_key: "send_carrier_pigeon".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_output_keys_are_rejected() {
        let catalog = SkillCatalog::builtin();
        let steps = vec![step(1, "enrich_lead", "profile"), step(2, "schedule_call", "profile")];

        let error = ExecutionPlan::build(&sequence(steps), &catalog, &empty_context())
            .expect_err("duplicate output key should fail validation");

        assert_eq!(
            error,
            SequenceValidationError::DuplicateOutputKey {
                output_key: "profile".to_string(),
                first_order: 1,
                duplicate_order: 2,
            }
        );
    }

    #[test]
    fn missing_required_input_binding_is_rejected() {
        let catalog = SkillCatalog::builtin();
        let mut bad = step(1, "update_crm_stage", "crm_ref");
        bad.input_bindings =
            vec![("lead_id".to_string(), InputBinding::Literal { value: json!("L-100") })];

        let error = ExecutionPlan::build(&sequence(vec![bad]), &catalog, &empty_context())
            .expect_err("missing required input should fail validation");

        assert_eq!(
            error,
            SequenceValidationError::MissingRequiredInput {
                step_order: 1,
                input_key: "stage".to_string(),
            }
        );
    }

    #[test]
    fn forward_reference_is_rejected() {
        let catalog = SkillCatalog::builtin();
        let mut first = step(1, "enrich_lead", "profile");
        first.input_bindings.push((
            "hint".to_string(),
            InputBinding::Reference { key: "slot".to_string() },
        ));
        let steps = vec![first, step(2, "schedule_call", "slot")];

        let error = ExecutionPlan::build(&sequence(steps), &catalog, &empty_context())
            .expect_err("forward reference should fail validation");

        assert_eq!(
            error,
            SequenceValidationError::UnresolvableReference {
                step_order: 1,
                referenced_key: "slot".to_string(),
            }
        );
    }

    #[test]
    fn sibling_reference_inside_parallel_group_is_rejected() {
        let catalog = SkillCatalog::builtin();
        let mut reader = parallel(step(2, "schedule_call", "slot"), 1);
        reader.input_bindings.push((
            "hint".to_string(),
            InputBinding::Reference { key: "profile".to_string() },
        ));
        let steps = vec![parallel(step(1, "enrich_lead", "profile"), 1), reader];

        let error = ExecutionPlan::build(&sequence(steps), &catalog, &empty_context())
            .expect_err("sibling reference should fail validation");

        assert_eq!(
            error,
            SequenceValidationError::SiblingReference {
                step_order: 2,
                referenced_key: "profile".to_string(),
                sibling_order: 1,
            }
        );
    }

    #[test]
    fn initial_context_keys_satisfy_references() {
        let catalog = SkillCatalog::builtin();
        let mut reader = step(1, "enrich_lead", "profile");
        reader.input_bindings.push((
            "territory".to_string(),
            InputBinding::Reference { key: "territory".to_string() },
        ));

        let mut context = Map::new();
        context.insert("territory".to_string(), json!("emea"));

        let plan = ExecutionPlan::build(&sequence(vec![reader]), &catalog, &context)
            .expect("initial-context reference should validate");
        assert_eq!(plan.groups.len(), 1);
    }

    #[test]
    fn step_orders_must_start_at_one_and_stay_contiguous() {
        let catalog = SkillCatalog::builtin();
        let steps = vec![step(1, "enrich_lead", "profile"), step(3, "schedule_call", "slot")];

        let error = ExecutionPlan::build(&sequence(steps), &catalog, &empty_context())
            .expect_err("gap in step order should fail validation");

        assert_eq!(error, SequenceValidationError::NonContiguousOrder { position: 1, found: 3 });
    }

    #[test]
    fn parallel_mode_without_group_id_is_rejected() {
        let catalog = SkillCatalog::builtin();
        let mut bad = step(1, "enrich_lead", "profile");
        bad.execution_mode = ExecutionMode::Parallel;

        let error = ExecutionPlan::build(&sequence(vec![bad]), &catalog, &empty_context())
            .expect_err("parallel mode without group should fail validation");

        assert!(matches!(
            error,
            SequenceValidationError::InconsistentExecutionMode { step_order: 1, .. }
        ));
    }

    #[test]
    fn empty_sequence_builds_an_empty_plan() {
        let catalog = SkillCatalog::builtin();
        let plan = ExecutionPlan::build(&sequence(Vec::new()), &catalog, &empty_context())
            .expect("empty sequence should validate");

        assert!(plan.is_empty());
        assert_eq!(plan.step_count(), 0);
    }
}
