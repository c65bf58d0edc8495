//! End-to-end grading: template setup, score sheet import, teacher mappings, weighted
//! results and class ranking through the public engine facade and HTTP router.

mod common {
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;

    use academic_engine::academics::{
        AcademicEngine, AcademicSession, ActorId, ClassId, ComponentDraft, ExamHeader,
        ExamTypeLabel, GradeBand, GradingRepository, InMemoryAcademicStore, Notification,
        NotificationError, NotificationPublisher, Points, RemarkBand, SchoolClass,
        ScoreSheetImporter, SessionId, Student, StudentClassHistory, StudentId, SubjectId,
        TeacherId, TemplateDraft, TenantId, Term, TermId,
    };
    use academic_engine::config::EngineConfig;

    pub(super) const TENANT: &str = "hillcrest";

    pub(super) fn tenant() -> TenantId {
        TenantId::from(TENANT)
    }

    pub(super) fn term() -> TermId {
        TermId::from("2024-t1")
    }

    pub(super) fn math() -> SubjectId {
        SubjectId::from("mathematics")
    }

    #[derive(Default)]
    pub(super) struct RecordingNotifier {
        pub(super) events: Mutex<Vec<Notification>>,
    }

    impl NotificationPublisher for RecordingNotifier {
        fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
            self.events
                .lock()
                .expect("notifier mutex poisoned")
                .push(notification);
            Ok(())
        }
    }

    pub(super) type Engine = AcademicEngine<InMemoryAcademicStore, RecordingNotifier>;

    pub(super) fn engine_with_store() -> (Arc<Engine>, InMemoryAcademicStore) {
        let store = InMemoryAcademicStore::new();
        store.add_class(SchoolClass {
            id: ClassId::from("basic-7a"),
            tenant: tenant(),
            name: "Basic 7A".to_string(),
            level: 7,
            arm: Some("A".to_string()),
        });
        store.add_session(AcademicSession {
            id: SessionId::from("2024"),
            tenant: tenant(),
            name: "2024/2025".to_string(),
            starts_on: NaiveDate::from_ymd_opt(2024, 9, 9).expect("valid date"),
            is_current: true,
            promotion_completed: false,
        });
        store.add_term(Term {
            id: term(),
            tenant: tenant(),
            session_id: SessionId::from("2024"),
            name: "First Term".to_string(),
            sequence_number: 1,
            is_current: true,
        });
        for (id, name) in [("st-01", "Ada"), ("st-02", "Bayo"), ("st-03", "Chioma")] {
            store.add_student(Student {
                id: StudentId::from(id),
                tenant: tenant(),
                name: name.to_string(),
                current_class_id: ClassId::from("basic-7a"),
                is_active: true,
            });
            store.add_enrollment(StudentClassHistory::enroll(
                tenant(),
                StudentId::from(id),
                ClassId::from("basic-7a"),
                SessionId::from("2024"),
                term(),
                NaiveDate::from_ymd_opt(2024, 9, 9).expect("valid date"),
            ));
        }

        let engine = Arc::new(AcademicEngine::new(
            Arc::new(store.clone()),
            Arc::new(RecordingNotifier::default()),
            EngineConfig::default(),
        ));
        (engine, store)
    }

    fn band(label: &str, min: i64, max: i64) -> GradeBand {
        GradeBand {
            label: label.to_string(),
            min_score: Points::whole(min),
            max_score: Points::from_hundredths(max),
            remark: String::new(),
            order: 0,
        }
    }

    /// Homework 10, Classwork 20, Exam 70 out of 100, remarks by percentage.
    pub(super) fn school_template() -> TemplateDraft {
        TemplateDraft {
            name: "Junior Secondary".to_string(),
            total_marks: Points::HUNDRED,
            is_default: true,
            components: vec![
                ComponentDraft {
                    name: "Homework".to_string(),
                    weight: Points::whole(10),
                    is_required: false,
                    display_order: Some(1),
                },
                ComponentDraft {
                    name: "Classwork".to_string(),
                    weight: Points::whole(20),
                    is_required: true,
                    display_order: Some(2),
                },
                ComponentDraft {
                    name: "Exam".to_string(),
                    weight: Points::whole(70),
                    is_required: true,
                    display_order: Some(3),
                },
            ],
            grade_bands: vec![
                band("E", 0, 4_499),
                band("C", 45, 6_999),
                band("A", 70, 10_000),
            ],
            remark_bands: vec![
                RemarkBand {
                    min_percentage: Points::ZERO,
                    max_percentage: Points::from_hundredths(4_499),
                    remark: "{subject}: needs support".to_string(),
                },
                RemarkBand {
                    min_percentage: Points::whole(45),
                    max_percentage: Points::HUNDRED,
                    remark: "{grade} ({percentage}%)".to_string(),
                },
            ],
        }
    }

    /// Import a CSV score sheet and store it as one exam owned by `teacher`.
    pub(super) fn import_sheet(
        store: &InMemoryAcademicStore,
        teacher: &str,
        exam_type: &str,
        total: i64,
        csv: &str,
    ) {
        let sheet = ScoreSheetImporter::from_reader(
            csv.as_bytes(),
            ExamHeader {
                tenant: tenant(),
                teacher_id: TeacherId::from(teacher),
                subject_id: math(),
                class_id: ClassId::from("basic-7a"),
                term_id: term(),
                exam_type: ExamTypeLabel::parse(exam_type).expect("label"),
                total_marks: Points::whole(total),
            },
        )
        .expect("sheet imports");
        store
            .insert_exam(sheet.exam, sheet.grades)
            .expect("exam stored");
    }

    pub(super) fn admin() -> ActorId {
        ActorId::from("principal")
    }
}

use std::sync::Arc;

use academic_engine::academics::{
    academic_router, ClassId, ComponentId, ExamTypeBinding, ExamTypeLabel, MappingDraft, Points,
    StudentId, TeacherId, ACTOR_HEADER, TENANT_HEADER,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::*;

fn map(engine: &Engine, teacher: &str, exam_type: &str, component: &ComponentId) {
    engine
        .upsert_mapping(
            &tenant(),
            &TeacherId::from(teacher),
            MappingDraft {
                subject_id: math(),
                term_id: term(),
                exam_type: ExamTypeLabel::parse(exam_type).expect("label"),
                component_id: component.clone(),
                include_in_calculation: true,
            },
        )
        .expect("mapping saved");
}

#[test]
fn imported_scores_flow_into_weighted_results_and_rankings() {
    let (engine, store) = engine_with_store();
    let template = engine
        .save_template(&tenant(), &admin(), school_template())
        .expect("template saved");
    let component = |name: &str| {
        template
            .components
            .iter()
            .find(|component| component.name == name)
            .map(|component| component.id.clone())
            .expect("component exists")
    };

    import_sheet(&store, "t-eze", "Home Work", 10, "Student ID,Score\nst-01,10\nst-02,5\nst-03,\n");
    import_sheet(&store, "t-eze", "Class Test", 25, "Student ID,Score\nst-01,20\nst-02,25\nst-03,5\n");
    import_sheet(&store, "t-eze", "Terminal Exam", 70, "Student ID,Score\nst-01,63\nst-02,35\nst-03,21\n");

    let usage = engine
        .mapper()
        .exam_types(&tenant(), &TeacherId::from("t-eze"), &math(), &term())
        .expect("exam types");
    assert!(usage
        .iter()
        .all(|usage| usage.binding == ExamTypeBinding::Unmapped));

    map(&engine, "t-eze", "home work", &component("Homework"));
    map(&engine, "t-eze", "CLASS TEST", &component("Classwork"));
    map(&engine, "t-eze", "Terminal  Exam", &component("Exam"));

    // 10 + 16 + 63 = 89
    let ada = engine
        .compute_grade(&tenant(), &StudentId::from("st-01"), &math(), &term())
        .expect("result");
    assert_eq!(ada.grade.weighted_score, Points::whole(89));
    assert_eq!(ada.grade.resolved_grade_label, "A");
    assert_eq!(ada.grade.resolved_remark, "A (89.00%)");
    assert!(ada.completeness_flag());

    // Homework is optional: 0 + 4 + 21 = 25, still complete.
    let chioma = engine
        .compute_grade(&tenant(), &StudentId::from("st-03"), &math(), &term())
        .expect("result");
    assert_eq!(chioma.grade.weighted_score, Points::whole(25));
    assert!(chioma.completeness_flag());
    assert_eq!(chioma.grade.resolved_remark, "mathematics: needs support");

    let ranking = engine
        .rank_class(&tenant(), &ClassId::from("basic-7a"), Some(&math()), &term())
        .expect("ranking");
    let order: Vec<_> = ranking
        .iter()
        .map(|entry| (entry.student_id.as_str(), entry.rank))
        .collect();
    // Bayo: 5 + 20 + 35 = 60.
    assert_eq!(order, vec![("st-01", 1), ("st-02", 2), ("st-03", 3)]);
}

#[test]
fn remapping_an_exam_type_changes_the_next_result() {
    let (engine, store) = engine_with_store();
    let template = engine
        .save_template(&tenant(), &admin(), school_template())
        .expect("template saved");
    let classwork = template.components[1].id.clone();
    let exam = template.components[2].id.clone();

    import_sheet(&store, "t-eze", "Quiz", 10, "Student ID,Score\nst-01,10\n");
    import_sheet(&store, "t-eze", "Final", 100, "Student ID,Score\nst-01,50\n");
    map(&engine, "t-eze", "Final", &exam);
    map(&engine, "t-eze", "Quiz", &classwork);

    let before = engine
        .compute_grade(&tenant(), &StudentId::from("st-01"), &math(), &term())
        .expect("result");
    assert_eq!(before.grade.weighted_score, Points::whole(55));

    let quiz = engine
        .mapper()
        .list_mappings(&tenant(), &TeacherId::from("t-eze"), &math(), &term())
        .expect("mappings")
        .into_iter()
        .find(|mapping| mapping.exam_type.as_str() == "quiz")
        .expect("quiz mapping");
    engine
        .mapper()
        .update_mapping(
            &tenant(),
            &TeacherId::from("t-eze"),
            &quiz.id,
            academic_engine::academics::MappingChanges {
                include_in_calculation: Some(false),
                ..Default::default()
            },
        )
        .expect("mapping updated");

    let after = engine
        .compute_grade(&tenant(), &StudentId::from("st-01"), &math(), &term())
        .expect("result");
    assert_eq!(after.grade.weighted_score, Points::whole(35));
    assert!(!after.completeness_flag());
}

#[tokio::test]
async fn results_are_served_over_http() {
    let (engine, store) = engine_with_store();
    let template = engine
        .save_template(&tenant(), &admin(), school_template())
        .expect("template saved");
    import_sheet(&store, "t-eze", "Final", 100, "Student ID,Score\nst-02,80\n");
    map(&engine, "t-eze", "Final", &template.components[2].id);

    let router = academic_router(Arc::clone(&engine));
    let response = router
        .oneshot(
            Request::get("/api/v1/grading/results?student=st-02&subject=mathematics&term=2024-t1")
                .header(TENANT_HEADER, TENANT)
                .header(ACTOR_HEADER, "t-eze")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("body");
    let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["weighted_score"], 56.0);
    assert_eq!(body["resolved_grade_label"], "C");
    assert_eq!(body["breakdown"].as_array().map(Vec::len), Some(3));
}
