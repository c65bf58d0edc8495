use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use super::super::calculator::GradeCalculator;
use super::super::domain::{
    AcademicSession, ActorId, ClassId, PromotionAction, SessionId, StudentId, TenantId, TermId,
};
use super::super::errors::{ConfigurationError, EngineError};
use super::super::repository::{
    AcademicRepository, CommitTicket, Notification, NotificationPublisher, PromotionReceipt,
    PromotionWrite, RepositoryError,
};

/// One decision as submitted by a caller; `action` is parsed per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionDecisionInput {
    pub student_id: StudentId,
    pub action: String,
    #[serde(default)]
    pub next_class_id: Option<ClassId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Conflict,
    Invalid,
    Timeout,
}

impl FailureKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl ItemFailure {
    fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Outcome of one item that did not commit: either recorded against the item, or fatal
/// for the whole batch.
#[derive(Debug)]
enum ItemError {
    Item(ItemFailure),
    Fatal(EngineError),
}

impl From<EngineError> for ItemError {
    fn from(error: EngineError) -> Self {
        if let EngineError::Storage(_) = error {
            return Self::Fatal(error);
        }
        let kind = match &error {
            EngineError::NotFound(_) => FailureKind::NotFound,
            EngineError::Conflict(_) => FailureKind::Conflict,
            EngineError::Storage(_)
            | EngineError::Configuration(_)
            | EngineError::Forbidden(_)
            | EngineError::Invalid(_) => FailureKind::Invalid,
        };
        Self::Item(ItemFailure::new(kind, error.to_string()))
    }
}

impl From<RepositoryError> for ItemError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::DeadlineExceeded => {
                Self::Item(ItemFailure::new(FailureKind::Timeout, error.to_string()))
            }
            other => EngineError::from(other).into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionItemResult {
    pub student_id: StudentId,
    pub action: Option<PromotionAction>,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ItemFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PromotionReceipt>,
}

impl PromotionItemResult {
    fn failed(student_id: StudentId, action: Option<PromotionAction>, failure: ItemFailure) -> Self {
        Self {
            student_id,
            action,
            status: ItemStatus::Failed,
            failure: Some(failure),
            receipt: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Succeeded
    }
}

/// Full accounting of one batch; returned even when every item failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionBatchResult {
    pub session_id: SessionId,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub promotion_completed: bool,
    pub items: Vec<PromotionItemResult>,
}

impl PromotionBatchResult {
    pub fn failures(&self) -> impl Iterator<Item = &PromotionItemResult> {
        self.items.iter().filter(|item| !item.is_success())
    }
}

/// Per-(tenant, student) async locks. Entries nobody holds are pruned on access.
#[derive(Debug, Default)]
struct StudentLocks {
    entries: Mutex<HashMap<(TenantId, StudentId), Arc<AsyncMutex<()>>>>,
}

impl StudentLocks {
    fn lock_for(&self, tenant: &TenantId, student: &StudentId) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().expect("promotion lock registry poisoned");
        entries.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            entries
                .entry((tenant.clone(), student.clone()))
                .or_default(),
        )
    }
}

struct BatchContext {
    tenant: TenantId,
    session_id: SessionId,
    actor: ActorId,
    next_placement: Option<(SessionId, TermId)>,
    decided_at: DateTime<Utc>,
    effective_on: NaiveDate,
}

/// Applies explicit decisions one student at a time; a rejected item never stops the batch.
pub struct PromotionExecutor<R, N> {
    repository: Arc<R>,
    notifier: Arc<N>,
    calculator: GradeCalculator<R>,
    locks: Arc<StudentLocks>,
    item_timeout: Duration,
}

impl<R, N> Clone for PromotionExecutor<R, N> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            notifier: Arc::clone(&self.notifier),
            calculator: self.calculator.clone(),
            locks: Arc::clone(&self.locks),
            item_timeout: self.item_timeout,
        }
    }
}

impl<R, N> PromotionExecutor<R, N>
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<N>, item_timeout: Duration) -> Self {
        let calculator = GradeCalculator::new(Arc::clone(&repository));
        Self {
            repository,
            notifier,
            calculator,
            locks: Arc::new(StudentLocks::default()),
            item_timeout,
        }
    }

    /// Apply the batch. An unknown session or a missing next session abort the call before
    /// anything is written. Unavailable storage aborts it at the item where it surfaces;
    /// items committed before that point stay committed.
    pub async fn execute(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        actor: &ActorId,
        decisions: Vec<PromotionDecisionInput>,
    ) -> Result<PromotionBatchResult, EngineError> {
        let current = self
            .repository
            .session(tenant, session)?
            .ok_or_else(|| EngineError::NotFound(format!("academic session {session}")))?;

        let needs_next_session = decisions
            .iter()
            .filter_map(|decision| PromotionAction::parse(&decision.action))
            .any(PromotionAction::opens_enrollment);
        let next_placement = if needs_next_session {
            Some(self.next_placement(tenant, &current)?)
        } else {
            None
        };

        let decided_at = Utc::now();
        let context = Arc::new(BatchContext {
            tenant: tenant.clone(),
            session_id: session.clone(),
            actor: actor.clone(),
            next_placement,
            decided_at,
            effective_on: decided_at.date_naive(),
        });

        let submitted = decisions.len();
        let mut items = Vec::with_capacity(submitted);
        for decision in decisions {
            let item = match self.execute_item(&context, decision).await {
                Ok(item) => item,
                Err(fatal) => {
                    error!(
                        tenant = %tenant,
                        session = %session,
                        processed = items.len(),
                        error = %fatal,
                        "promotion batch aborted"
                    );
                    return Err(fatal);
                }
            };
            if let Some(failure) = &item.failure {
                warn!(
                    tenant = %tenant,
                    session = %session,
                    student = %item.student_id,
                    kind = failure.kind.label(),
                    reason = %failure.reason,
                    "promotion decision failed"
                );
            }
            items.push(item);
        }

        let succeeded = items.iter().filter(|item| item.is_success()).count();
        let failed = submitted - succeeded;
        let promotion_completed = if succeeded > 0 {
            self.complete_if_settled(tenant, session, submitted, succeeded, failed)
        } else {
            current.promotion_completed
        };

        info!(
            tenant = %tenant,
            session = %session,
            actor = %actor,
            submitted,
            succeeded,
            failed,
            promotion_completed,
            "promotion batch processed"
        );

        Ok(PromotionBatchResult {
            session_id: session.clone(),
            submitted,
            succeeded,
            failed,
            promotion_completed,
            items,
        })
    }

    async fn execute_item(
        &self,
        context: &Arc<BatchContext>,
        input: PromotionDecisionInput,
    ) -> Result<PromotionItemResult, EngineError> {
        let student_id = input.student_id;
        let Some(action) = PromotionAction::parse(&input.action) else {
            let reason = format!("unrecognized promotion action '{}'", input.action.trim());
            return Ok(PromotionItemResult::failed(
                student_id,
                None,
                ItemFailure::new(FailureKind::Invalid, reason),
            ));
        };
        if action.requires_next_class() && input.next_class_id.is_none() {
            let reason = format!("next_class_id is required to {action}");
            return Ok(PromotionItemResult::failed(
                student_id,
                Some(action),
                ItemFailure::new(FailureKind::Invalid, reason),
            ));
        }

        let deadline = Instant::now() + self.item_timeout;
        let timeout_reason = format!(
            "decision did not complete within {} ms",
            self.item_timeout.as_millis()
        );

        let lock = self.locks.lock_for(&context.tenant, &student_id);
        let guard = match timeout_at(deadline, lock.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                return Ok(PromotionItemResult::failed(
                    student_id,
                    Some(action),
                    ItemFailure::new(FailureKind::Timeout, timeout_reason),
                ));
            }
        };

        let ticket = CommitTicket::new();
        let work = ItemWork {
            repository: Arc::clone(&self.repository),
            calculator: self.calculator.clone(),
            context: Arc::clone(context),
            student_id: student_id.clone(),
            action,
            next_class_id: input.next_class_id,
            ticket: ticket.clone(),
        };
        let mut handle = tokio::task::spawn_blocking(move || {
            // The student stays locked until the storage work is over, even past the deadline.
            let _guard = guard;
            work.run()
        });

        let joined = match timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined,
            Err(_) if ticket.cancel() => {
                return Ok(PromotionItemResult::failed(
                    student_id,
                    Some(action),
                    ItemFailure::new(FailureKind::Timeout, timeout_reason),
                ));
            }
            // Commit already started; its outcome is the item's outcome.
            Err(_) => handle.await,
        };

        match joined {
            Ok(Ok(receipt)) => Ok(PromotionItemResult {
                student_id,
                action: Some(action),
                status: ItemStatus::Succeeded,
                failure: None,
                receipt: Some(receipt),
            }),
            Ok(Err(ItemError::Item(failure))) => {
                Ok(PromotionItemResult::failed(student_id, Some(action), failure))
            }
            Ok(Err(ItemError::Fatal(error))) => Err(error),
            Err(join_error) => Err(EngineError::Storage(format!(
                "promotion task for student {student_id} aborted: {join_error}"
            ))),
        }
    }

    fn next_placement(
        &self,
        tenant: &TenantId,
        current: &AcademicSession,
    ) -> Result<(SessionId, TermId), EngineError> {
        let missing = || ConfigurationError::NextSessionMissing {
            session: current.id.clone(),
        };

        let next = self
            .repository
            .sessions(tenant)?
            .into_iter()
            .filter(|session| session.starts_on > current.starts_on)
            .min_by_key(|session| session.starts_on)
            .ok_or_else(missing)?;
        let first_term = self
            .repository
            .terms(tenant, &next.id)?
            .into_iter()
            .min_by_key(|term| term.sequence_number)
            .ok_or_else(missing)?;

        Ok((next.id, first_term.id))
    }

    /// Mark the session complete once nobody active in it is left undecided.
    fn complete_if_settled(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        submitted: usize,
        succeeded: usize,
        failed: usize,
    ) -> bool {
        let remaining = match self.undecided_remaining(tenant, session) {
            Ok(remaining) => remaining,
            Err(error) => {
                warn!(tenant = %tenant, session = %session, error = %error, "could not check promotion progress");
                return false;
            }
        };
        if remaining > 0 {
            return false;
        }

        if let Err(error) = self.repository.mark_promotion_completed(tenant, session) {
            warn!(tenant = %tenant, session = %session, error = %error, "could not mark promotion completed");
            return false;
        }

        let mut details = BTreeMap::new();
        details.insert("submitted".to_string(), submitted.to_string());
        details.insert("succeeded".to_string(), succeeded.to_string());
        details.insert("failed".to_string(), failed.to_string());
        let notification = Notification {
            template: "promotion_completed".to_string(),
            tenant: tenant.clone(),
            session_id: session.clone(),
            details,
        };
        if let Err(error) = self.notifier.publish(notification) {
            warn!(tenant = %tenant, session = %session, error = %error, "promotion completion notification dropped");
        }
        true
    }

    fn undecided_remaining(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<usize, EngineError> {
        let mut remaining = 0;
        for row in self.repository.current_enrollments(tenant, session)? {
            let active = self
                .repository
                .student(tenant, &row.student_id)?
                .is_some_and(|student| student.is_active);
            if active && !row.is_decided() {
                remaining += 1;
            }
        }
        Ok(remaining)
    }
}

/// Storage side of one decision; runs on the blocking pool.
struct ItemWork<R> {
    repository: Arc<R>,
    calculator: GradeCalculator<R>,
    context: Arc<BatchContext>,
    student_id: StudentId,
    action: PromotionAction,
    next_class_id: Option<ClassId>,
    ticket: CommitTicket,
}

impl<R> ItemWork<R>
where
    R: AcademicRepository + 'static,
{
    fn run(self) -> Result<PromotionReceipt, ItemError> {
        let context = &self.context;
        let tenant = &context.tenant;
        let session = &context.session_id;

        let student = self
            .repository
            .student(tenant, &self.student_id)?
            .ok_or_else(|| EngineError::NotFound(format!("student {}", self.student_id)))?;

        let history = self.repository.session_history(tenant, &student.id, session)?;
        if history.iter().any(|row| row.is_decided()) {
            return Err(EngineError::Conflict(format!(
                "student {} already decided for session {session}",
                student.id
            ))
            .into());
        }
        let current = history
            .into_iter()
            .find(|row| row.is_current)
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "student {} has no current enrollment in session {session}",
                    student.id
                ))
            })?;

        let next_class_id = match self.action {
            PromotionAction::Promote | PromotionAction::Transfer => {
                let next = self.next_class_id.ok_or_else(|| {
                    EngineError::Invalid(format!("next_class_id is required to {}", self.action))
                })?;
                if self.repository.class(tenant, &next)?.is_none() {
                    return Err(
                        EngineError::Invalid(format!("next class {next} does not exist")).into(),
                    );
                }
                Some(next)
            }
            PromotionAction::Repeat => Some(current.class_id.clone()),
            PromotionAction::Graduate => None,
        };

        let final_average = match self.calculator.session_average(
            tenant,
            &student.id,
            &current.class_id,
            session,
        ) {
            Ok(average) => average.average,
            Err(EngineError::Configuration(error)) => {
                warn!(tenant = %tenant, student = %student.id, error = %error, "final average unavailable");
                None
            }
            Err(other) => return Err(other.into()),
        };
        let promotion_eligible = self
            .repository
            .promotion_settings(tenant)?
            .unwrap_or_default()
            .eligibility(&current.class_id, final_average)
            .ok()
            .flatten();

        let write = PromotionWrite {
            tenant: tenant.clone(),
            student_id: student.id,
            session_id: session.clone(),
            action: self.action,
            next_class_id,
            next_placement: if self.action.opens_enrollment() {
                context.next_placement.clone()
            } else {
                None
            },
            final_average,
            promotion_eligible,
            decided_by: context.actor.clone(),
            decided_at: context.decided_at,
            effective_on: context.effective_on,
        };

        Ok(self.repository.apply_promotion(write, &self.ticket)?)
    }
}
