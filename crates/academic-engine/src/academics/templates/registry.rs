use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::super::domain::{next_identifier, ActorId, ComponentId, TemplateId, TenantId};
use super::super::errors::{ConfigurationError, EngineError};
use super::super::normalizer::name_key;
use super::super::repository::GradingRepository;
use super::{validate_draft, AssessmentComponent, GradeTemplate, TemplateDraft};

/// Grading configuration: validated, saved atomically, never cached.
pub struct TemplateRegistry<R> {
    repository: Arc<R>,
}

impl<R> Clone for TemplateRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> TemplateRegistry<R>
where
    R: GradingRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Validate and persist a new template together with its components and bands.
    pub fn save_template(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        draft: TemplateDraft,
    ) -> Result<GradeTemplate, EngineError> {
        validate_draft(&draft)?;

        let template = build_template(
            TemplateId(next_identifier("tpl")),
            tenant,
            actor,
            draft,
            &HashMap::new(),
        );
        let stored = self.repository.save_template(template)?;
        info!(
            tenant = %tenant,
            template = %stored.id,
            is_default = stored.is_default,
            components = stored.components.len(),
            "grade template saved"
        );
        Ok(stored)
    }

    /// Replace a template's configuration wholesale. Components keep their id when their
    /// name is unchanged so existing mappings stay valid.
    pub fn update_template(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        id: &TemplateId,
        draft: TemplateDraft,
    ) -> Result<GradeTemplate, EngineError> {
        let existing = self.fetch(tenant, id)?;
        if !existing.is_active {
            return Err(ConfigurationError::TemplateInactive {
                template: id.clone(),
            }
            .into());
        }
        validate_draft(&draft)?;

        let known_ids: HashMap<String, ComponentId> = existing
            .components
            .iter()
            .map(|component| (name_key(&component.name), component.id.clone()))
            .collect();

        let mut draft = draft;
        draft.is_default = draft.is_default || existing.is_default;
        let template = build_template(existing.id, tenant, actor, draft, &known_ids);
        let stored = self.repository.save_template(template)?;
        info!(tenant = %tenant, template = %stored.id, "grade template updated");
        Ok(stored)
    }

    /// Make the template the tenant's default, clearing the flag everywhere else.
    pub fn set_default(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        id: &TemplateId,
    ) -> Result<GradeTemplate, EngineError> {
        let template = self.fetch(tenant, id)?;
        if !template.is_active {
            return Err(ConfigurationError::TemplateInactive {
                template: id.clone(),
            }
            .into());
        }
        let stored = self.repository.set_default_template(tenant, id)?;
        info!(tenant = %tenant, template = %id, actor = %actor, "default grade template set");
        Ok(stored)
    }

    pub fn fetch(&self, tenant: &TenantId, id: &TemplateId) -> Result<GradeTemplate, EngineError> {
        self.repository
            .fetch_template(tenant, id)?
            .ok_or_else(|| EngineError::NotFound(format!("grade template {id}")))
    }

    pub fn default_for(&self, tenant: &TenantId) -> Result<GradeTemplate, EngineError> {
        self.repository
            .default_template(tenant)?
            .ok_or_else(|| ConfigurationError::NoDefaultTemplate.into())
    }

    pub fn list(&self, tenant: &TenantId) -> Result<Vec<GradeTemplate>, EngineError> {
        Ok(self.repository.templates(tenant)?)
    }

    /// Soft delete; a deleted template is never resolved and cannot become default.
    pub fn delete_template(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        id: &TemplateId,
    ) -> Result<GradeTemplate, EngineError> {
        let mut template = self.fetch(tenant, id)?;
        template.is_active = false;
        template.is_default = false;
        template.updated_by = actor.clone();
        template.updated_at = Utc::now();
        let stored = self.repository.save_template(template)?;
        info!(tenant = %tenant, template = %id, "grade template deactivated");
        Ok(stored)
    }
}

fn build_template(
    id: TemplateId,
    tenant: &TenantId,
    actor: &ActorId,
    draft: TemplateDraft,
    known_ids: &HashMap<String, ComponentId>,
) -> GradeTemplate {
    let components = draft
        .components
        .into_iter()
        .enumerate()
        .map(|(index, component)| {
            let id = known_ids
                .get(&name_key(&component.name))
                .cloned()
                .unwrap_or_else(|| ComponentId(next_identifier("cmp")));
            AssessmentComponent {
                id,
                name: component.name.trim().to_string(),
                weight: component.weight,
                is_required: component.is_required,
                display_order: component
                    .display_order
                    .unwrap_or_else(|| u16::try_from(index).unwrap_or(u16::MAX)),
            }
        })
        .collect();

    GradeTemplate {
        id,
        tenant: tenant.clone(),
        name: draft.name.trim().to_string(),
        total_marks: draft.total_marks,
        is_default: draft.is_default,
        is_active: true,
        components,
        grade_bands: draft.grade_bands,
        remark_bands: draft.remark_bands,
        updated_by: actor.clone(),
        updated_at: Utc::now(),
    }
}
