use std::sync::Arc;

use tracing::info;

use super::domain::{AcademicSession, SessionId, TenantId, Term, TermId};
use super::errors::EngineError;
use super::repository::{EnrollmentRepository, RepositoryError};

/// Single-writer "current" transitions for sessions and terms.
pub struct AcademicCalendar<R> {
    repository: Arc<R>,
}

impl<R> Clone for AcademicCalendar<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> AcademicCalendar<R>
where
    R: EnrollmentRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn set_current_session(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<AcademicSession, EngineError> {
        let updated = self
            .repository
            .set_current_session(tenant, session)
            .map_err(|error| match error {
                RepositoryError::NotFound(_) => {
                    EngineError::NotFound(format!("academic session {session}"))
                }
                other => other.into(),
            })?;
        info!(tenant = %tenant, session = %session, "current academic session changed");
        Ok(updated)
    }

    pub fn set_current_term(&self, tenant: &TenantId, term: &TermId) -> Result<Term, EngineError> {
        let updated = self
            .repository
            .set_current_term(tenant, term)
            .map_err(|error| match error {
                RepositoryError::NotFound(_) => EngineError::NotFound(format!("term {term}")),
                other => other.into(),
            })?;
        info!(tenant = %tenant, term = %term, session = %updated.session_id, "current term changed");
        Ok(updated)
    }

    pub fn current_session(&self, tenant: &TenantId) -> Result<AcademicSession, EngineError> {
        self.repository
            .sessions(tenant)?
            .into_iter()
            .find(|session| session.is_current)
            .ok_or_else(|| EngineError::NotFound("no current academic session".to_string()))
    }
}
