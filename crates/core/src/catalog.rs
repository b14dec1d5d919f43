use std::collections::HashMap;

use crate::domain::skill::{ActionType, Skill, SkillCategory, SkillKey};

/// Read-only lookup from skill key to skill metadata. Populated once at
/// startup; the orchestrator consults it during plan validation and
/// policy gating but never mutates it.
#[derive(Clone, Debug, Default)]
pub struct SkillCatalog {
    skills: HashMap<String, Skill>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog shipped with the demo dataset. Keys here line up with the
    /// seeded sequences and the stub skill runtime.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        catalog.register(Skill {
            key: SkillKey("enrich_lead".to_string()),
            display_name: "Enrich Lead".to_string(),
            category: SkillCategory::Research,
            action_type: ActionType::DataEnrich,
            required_inputs: vec!["lead_id".to_string()],
            declared_outputs: vec!["company".to_string(), "title".to_string()],
        });
        catalog.register(Skill {
            key: SkillKey("score_lead".to_string()),
            display_name: "Score Lead".to_string(),
            category: SkillCategory::Research,
            action_type: ActionType::DataEnrich,
            required_inputs: vec!["profile".to_string()],
            declared_outputs: vec!["score".to_string()],
        });
        catalog.register(Skill {
            key: SkillKey("draft_followup_email".to_string()),
            display_name: "Draft Follow-up Email".to_string(),
            category: SkillCategory::Outreach,
            action_type: ActionType::EmailSend,
            required_inputs: vec!["lead_id".to_string(), "profile".to_string()],
            declared_outputs: vec!["subject".to_string(), "body".to_string()],
        });
        catalog.register(Skill {
            key: SkillKey("schedule_call".to_string()),
            display_name: "Schedule Call".to_string(),
            category: SkillCategory::Outreach,
            action_type: ActionType::CallSchedule,
            required_inputs: vec!["lead_id".to_string()],
            declared_outputs: vec!["slot".to_string()],
        });
        catalog.register(Skill {
            key: SkillKey("update_crm_stage".to_string()),
            display_name: "Update CRM Stage".to_string(),
            category: SkillCategory::Crm,
            action_type: ActionType::CrmUpdate,
            required_inputs: vec!["lead_id".to_string(), "stage".to_string()],
            declared_outputs: vec!["crm_record".to_string()],
        });
        catalog.register(Skill {
            key: SkillKey("log_activity_note".to_string()),
            display_name: "Log Activity Note".to_string(),
            category: SkillCategory::Crm,
            action_type: ActionType::NoteCreate,
            required_inputs: vec!["lead_id".to_string(), "note".to_string()],
            declared_outputs: vec!["note_id".to_string()],
        });

        catalog
    }

    pub fn register(&mut self, skill: Skill) {
        self.skills.insert(skill.key.0.clone(), skill);
    }

    pub fn get(&self, key: &SkillKey) -> Option<&Skill> {
        self.skills.get(&key.0)
    }

    pub fn contains(&self, key: &SkillKey) -> bool {
        self.skills.contains_key(&key.0)
    }

    pub fn action_type_of(&self, key: &SkillKey) -> Option<ActionType> {
        self.get(key).map(|skill| skill.action_type)
    }

    pub fn skills(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}
