use super::common::*;
use crate::academics::repository::{GradingRepository, MappingFilter, ScoreFilter};
use crate::academics::{
    weighted_grade, ClassId, ConfigurationError, EngineError, GradeTemplate, Points, StudentId,
    SubjectId, TeacherId,
};

/// Math in JSS1, term 1: quizzes, tests and a 1000-mark assignment feed CA, the final
/// (out of 120) feeds Exam.
fn graded_school() -> (School, GradeTemplate) {
    let school = school();
    let template = school.install_template();
    let ca = component_named(&template, "Continuous Assessment");
    let exam = component_named(&template, "Exam");
    for student in ["s1", "s2", "s3", "s4", "s5"] {
        school.enroll(student, "jss1");
    }

    school.exam(
        &teacher(),
        &math(),
        "jss1",
        &term(1),
        "Quiz",
        20,
        &[("s1", 20.0), ("s3", 10.0), ("s4", 13.0)],
    );
    school.exam(&teacher(), &math(), "jss1", &term(1), "Test", 30, &[("s4", 7.0)]);
    school.exam(
        &teacher(),
        &math(),
        "jss1",
        &term(1),
        "Assignment",
        1000,
        &[("s2", 499.85)],
    );
    school.exam(
        &teacher(),
        &math(),
        "jss1",
        &term(1),
        "Final",
        120,
        &[("s1", 79.99), ("s2", 120.0), ("s4", 91.0)],
    );

    for exam_type in ["Quiz", "Test", "Assignment"] {
        school.map(&teacher(), &math(), &term(1), exam_type, &ca);
    }
    school.map(&teacher(), &math(), &term(1), "Final", &exam);
    (school, template)
}

fn compute(school: &School, student: &str) -> crate::academics::ComputedResult {
    school
        .engine
        .compute_grade(&tenant(), &StudentId::from(student), &math(), &term(1))
        .expect("grade computes")
}

#[test]
fn half_hundredth_rounds_up_into_the_next_band() {
    let (school, _) = graded_school();

    let top = compute(&school, "s1");
    assert_eq!(top.grade.weighted_score, Points::whole(80));
    assert_eq!(top.grade.resolved_grade_label, "A");
    assert_eq!(top.grade.resolved_remark, "A at 80.00%");

    let below = compute(&school, "s2");
    assert_eq!(below.grade.weighted_score, Points::from_hundredths(7_999));
    assert_eq!(below.grade.resolved_grade_label, "B");
    assert_eq!(below.grade.resolved_remark, "B in math: good");
}

#[test]
fn missing_required_component_contributes_zero() {
    let (school, template) = graded_school();
    let exam = component_named(&template, "Exam");

    let result = compute(&school, "s3");

    assert!(!result.completeness_flag());
    assert_eq!(result.grade.missing_required, vec![exam]);
    assert_eq!(result.grade.weighted_score, Points::whole(20));
    assert_eq!(result.weighted_percentage(), Points::whole(20));
    assert_eq!(result.grade.resolved_grade_label, "F");
    assert_eq!(result.graded_exams, 1);
}

#[test]
fn student_without_scores_gets_zero_and_incomplete() {
    let (school, _) = graded_school();
    let result = compute(&school, "s5");
    assert_eq!(result.graded_exams, 0);
    assert_eq!(result.grade.weighted_score, Points::ZERO);
    assert!(!result.completeness_flag());
}

#[test]
fn result_does_not_depend_on_input_order() {
    let (school, template) = graded_school();
    let mappings = school
        .store
        .mappings(
            &tenant(),
            &MappingFilter {
                subject: Some(math()),
                ..MappingFilter::default()
            },
        )
        .expect("mappings");
    let scores = school
        .store
        .exam_scores(
            &tenant(),
            &ScoreFilter {
                student: StudentId::from("s4"),
                term: term(1),
                subject: Some(math()),
                class: None,
            },
        )
        .expect("scores");
    assert_eq!(scores.len(), 3);

    let forward = weighted_grade(&template, &mappings, &scores, "math");

    let mut reversed_template = template.clone();
    reversed_template.components.reverse();
    let mut reversed_scores = scores.clone();
    reversed_scores.reverse();
    let mut reversed_mappings = mappings.clone();
    reversed_mappings.reverse();
    let backward = weighted_grade(
        &reversed_template,
        &reversed_mappings,
        &reversed_scores,
        "math",
    );

    assert_eq!(forward, backward);
    // CA: mean(13/20, 7/30) * 40 = 17.67; Exam: 91/120 * 60 = 45.50.
    assert_eq!(forward.weighted_score, Points::from_hundredths(6_317));
}

#[test]
fn exams_resolve_through_their_own_teachers_mappings() {
    let (school, template) = graded_school();
    let exam = component_named(&template, "Exam");
    let colleague = TeacherId::from("t-bola");
    school.exam(&colleague, &math(), "jss1", &term(1), "Quiz", 20, &[("s3", 20.0)]);
    school.map(&colleague, &math(), &term(1), "Quiz", &exam);

    let result = compute(&school, "s3");

    // t-ada's quiz (10/20) stays CA, t-bola's quiz (20/20) counts as Exam.
    assert!(result.completeness_flag());
    assert_eq!(result.grade.weighted_score, Points::whole(80));
}

#[test]
fn excluded_exam_types_do_not_count() {
    let (school, template) = graded_school();
    let ca = component_named(&template, "Continuous Assessment");
    school.exam(&teacher(), &math(), "jss1", &term(1), "Practice", 10, &[("s1", 0.0)]);
    school
        .engine
        .upsert_mapping(
            &tenant(),
            &teacher(),
            crate::academics::MappingDraft {
                subject_id: math(),
                term_id: term(1),
                exam_type: label("Practice"),
                component_id: ca,
                include_in_calculation: false,
            },
        )
        .expect("excluded mapping");

    let result = compute(&school, "s1");
    assert_eq!(result.grade.weighted_score, Points::whole(80));
    assert_eq!(result.graded_exams, 3);
}

#[test]
fn no_default_template_is_a_configuration_error() {
    let school = school();
    school.enroll("s1", "jss1");

    match school
        .engine
        .compute_grade(&tenant(), &StudentId::from("s1"), &math(), &term(1))
    {
        Err(EngineError::Configuration(ConfigurationError::NoDefaultTemplate)) => {}
        other => panic!("expected missing default template, got {other:?}"),
    }
}

#[test]
fn subject_without_mappings_is_a_configuration_error() {
    let (school, _) = graded_school();
    let english = SubjectId::from("english");
    school.exam(&teacher(), &english, "jss1", &term(1), "Essay", 50, &[("s1", 30.0)]);

    match school
        .engine
        .compute_grade(&tenant(), &StudentId::from("s1"), &english, &term(1))
    {
        Err(EngineError::Configuration(ConfigurationError::MappingNotConfigured {
            subject,
            term: missing_term,
        })) => {
            assert_eq!(subject, english);
            assert_eq!(missing_term, term(1));
        }
        other => panic!("expected mapping not configured, got {other:?}"),
    }
}

#[test]
fn term_overall_skips_unconfigured_subjects() {
    let (school, _) = graded_school();
    school.exam(
        &teacher(),
        &SubjectId::from("english"),
        "jss1",
        &term(1),
        "Essay",
        50,
        &[("s1", 10.0)],
    );

    let overall = school
        .engine
        .calculator()
        .term_overall(&tenant(), &StudentId::from("s1"), &ClassId::from("jss1"), &term(1))
        .expect("term overall")
        .expect("math result present");

    assert_eq!(overall.subjects, vec![math()]);
    assert_eq!(overall.percentage, Points::whole(80));
}

#[test]
fn session_average_counts_only_terms_with_results() {
    let (school, template) = graded_school();
    let ca = component_named(&template, "Continuous Assessment");
    let exam = component_named(&template, "Exam");
    school.exam(&teacher(), &math(), "jss1", &term(2), "Quiz", 10, &[("s1", 5.0)]);
    school.exam(&teacher(), &math(), "jss1", &term(2), "Final", 100, &[("s1", 50.0)]);
    school.map(&teacher(), &math(), &term(2), "Quiz", &ca);
    school.map(&teacher(), &math(), &term(2), "Final", &exam);

    let average = school
        .engine
        .calculator()
        .session_average(&tenant(), &StudentId::from("s1"), &ClassId::from("jss1"), &session())
        .expect("session average");

    assert_eq!(average.terms_counted, 2);
    assert_eq!(average.average, Some(Points::whole(65)));
}

#[test]
fn class_ranking_by_subject_skips_ungraded_students() {
    let (school, _) = graded_school();

    let ranked = school
        .engine
        .rank_class(&tenant(), &ClassId::from("jss1"), Some(&math()), &term(1))
        .expect("ranking");

    let order: Vec<_> = ranked
        .iter()
        .map(|entry| (entry.student_id.as_str(), entry.rank))
        .collect();
    assert_eq!(order, vec![("s1", 1), ("s2", 2), ("s4", 3), ("s3", 4)]);
}

#[test]
fn class_ranking_shares_ranks_on_ties() {
    let (school, _) = graded_school();
    school.enroll("s6", "jss1");
    // s6 mirrors s1 through the same exam types.
    school.exam(&teacher(), &math(), "jss1", &term(1), "Quiz", 20, &[("s6", 20.0)]);
    school.exam(&teacher(), &math(), "jss1", &term(1), "Final", 120, &[("s6", 79.99)]);

    let ranked = school
        .engine
        .rank_class(&tenant(), &ClassId::from("jss1"), None, &term(1))
        .expect("ranking");

    let top: Vec<_> = ranked
        .iter()
        .take(3)
        .map(|entry| (entry.student_id.as_str(), entry.rank))
        .collect();
    assert_eq!(top, vec![("s1", 1), ("s6", 1), ("s2", 3)]);
}

#[test]
fn ranking_unknown_term_is_not_found() {
    let (school, _) = graded_school();
    let result = school.engine.rank_class(
        &tenant(),
        &ClassId::from("jss1"),
        None,
        &crate::academics::TermId::from("missing"),
    );
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}
