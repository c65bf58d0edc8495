use academic_engine::academics::{
    AcademicSession, ClassId, ComponentDraft, GradeBand, InMemoryAcademicStore, Notification,
    NotificationError, NotificationPublisher, Points, PromotionMode, PromotionSettings,
    SchoolClass, SessionId, Student, StudentClassHistory, StudentId, TemplateDraft, TenantId,
    Term, TermId,
};
use chrono::{Months, NaiveDate};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

pub(crate) const SAMPLE_TENANT: &str = "demo-academy";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Keeps every notification in memory and logs it; stands in for a message broker.
#[derive(Default, Clone)]
pub(crate) struct InMemoryNotifier {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationPublisher for InMemoryNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            template = %notification.template,
            tenant = %notification.tenant,
            session = %notification.session_id,
            "notification published"
        );
        let mut guard = self.events.lock().expect("notifier mutex poisoned");
        guard.push(notification);
        Ok(())
    }
}

impl InMemoryNotifier {
    pub(crate) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

/// Identifiers of the seeded sample school.
#[derive(Debug, Clone)]
pub(crate) struct SampleSchool {
    pub(crate) tenant: TenantId,
    pub(crate) session: SessionId,
    pub(crate) next_session: SessionId,
    pub(crate) terms: Vec<TermId>,
    pub(crate) students: Vec<(StudentId, ClassId)>,
}

/// Seeds three junior secondary classes, two sessions and six students.
pub(crate) fn seed_sample_school(
    store: &InMemoryAcademicStore,
    session_start: NaiveDate,
) -> SampleSchool {
    let tenant = TenantId::from(SAMPLE_TENANT);

    for level in 1..=3u16 {
        store.add_class(SchoolClass {
            id: ClassId(format!("jss{level}")),
            tenant: tenant.clone(),
            name: format!("JSS {level}"),
            level,
            arm: None,
        });
    }

    let next_start = session_start
        .checked_add_months(Months::new(12))
        .unwrap_or(session_start);
    let mut terms = Vec::new();
    for (starts_on, current) in [(session_start, true), (next_start, false)] {
        let year = starts_on.format("%Y").to_string();
        let session = SessionId(year.clone());
        store.add_session(AcademicSession {
            id: session.clone(),
            tenant: tenant.clone(),
            name: format!("{year} session"),
            starts_on,
            is_current: current,
            promotion_completed: false,
        });
        for sequence in 1..=3u8 {
            let id = TermId(format!("{year}-t{sequence}"));
            store.add_term(Term {
                id: id.clone(),
                tenant: tenant.clone(),
                session_id: session.clone(),
                name: format!("Term {sequence}"),
                sequence_number: sequence,
                is_current: current && sequence == 1,
            });
            if current {
                terms.push(id);
            }
        }
    }

    let session = SessionId(session_start.format("%Y").to_string());
    let next_session = SessionId(next_start.format("%Y").to_string());

    let roster = [
        ("amaka", "Amaka Obi", "jss1"),
        ("bode", "Bode Lawal", "jss1"),
        ("chidi", "Chidi Eze", "jss1"),
        ("dayo", "Dayo Ade", "jss1"),
        ("efe", "Efe Omoregie", "jss3"),
        ("funmi", "Funmi Bello", "jss3"),
    ];
    let mut students = Vec::new();
    for (id, name, class) in roster {
        let student = StudentId::from(id);
        let class = ClassId::from(class);
        store.add_student(Student {
            id: student.clone(),
            tenant: tenant.clone(),
            name: name.to_string(),
            current_class_id: class.clone(),
            is_active: true,
        });
        store.add_enrollment(StudentClassHistory::enroll(
            tenant.clone(),
            student.clone(),
            class.clone(),
            session.clone(),
            terms[0].clone(),
            session_start,
        ));
        students.push((student, class));
    }

    store.set_promotion_settings(
        &tenant,
        PromotionSettings {
            mode: PromotionMode::PerformanceBased,
            minimum_average: Some(Points::whole(50)),
            ..PromotionSettings::default()
        },
    );

    info!(%tenant, students = students.len(), "sample school seeded");

    SampleSchool {
        tenant,
        session,
        next_session,
        terms,
        students,
    }
}

/// Continuous assessment 40, examination 60, five grade bands.
pub(crate) fn sample_template() -> TemplateDraft {
    let band = |label: &str, min: i64, max_hundredths: i64, remark: &str, order: u16| GradeBand {
        label: label.to_string(),
        min_score: Points::whole(min),
        max_score: Points::from_hundredths(max_hundredths),
        remark: remark.to_string(),
        order,
    };

    TemplateDraft {
        name: "Junior Secondary".to_string(),
        total_marks: Points::HUNDRED,
        is_default: true,
        components: vec![
            ComponentDraft {
                name: "Continuous Assessment".to_string(),
                weight: Points::whole(40),
                is_required: true,
                display_order: Some(1),
            },
            ComponentDraft {
                name: "Examination".to_string(),
                weight: Points::whole(60),
                is_required: true,
                display_order: Some(2),
            },
        ],
        grade_bands: vec![
            band("F", 0, 3_999, "Fail", 5),
            band("D", 40, 4_999, "Pass", 4),
            band("C", 50, 5_999, "Credit", 3),
            band("B", 60, 7_999, "Very good", 2),
            band("A", 80, 10_000, "Excellent", 1),
        ],
        remark_bands: Vec::new(),
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
