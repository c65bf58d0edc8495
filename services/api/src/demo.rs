use crate::infra::{
    parse_date, sample_template, seed_sample_school, InMemoryNotifier, SampleSchool,
};
use academic_engine::academics::{
    AcademicEngine, AcademicRepository, ActorId, ClassId, EngineError, ExamHeader,
    ExamTypeLabel, GradeTemplate, GradingRepository, ImportedScoreSheet, InMemoryAcademicStore,
    MappingDraft, NotificationPublisher, Points, PromotionCandidate, PromotionDecisionInput,
    ScoreSheetImporter, SubjectId, SuggestedAction, TeacherId, TermId,
};
use academic_engine::config::EngineConfig;
use academic_engine::error::AppError;
use chrono::NaiveDate;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

const TEACHER: &str = "t-okafor";
const SUBJECT: &str = "mathematics";
const DEFAULT_SESSION_START: &str = "2024-09-02";
/// Mapped onto the template's components in display order.
const EXAM_TYPES: [&str; 2] = ["Quiz", "Examination"];

/// Quiz out of 20 and examination out of 100 for the first two terms.
const SCORES: [(&str, [Option<f64>; 4]); 6] = [
    ("amaka", [Some(18.0), Some(85.0), Some(19.0), Some(88.0)]),
    ("bode", [Some(12.0), Some(62.0), Some(14.0), Some(58.0)]),
    ("chidi", [Some(6.0), Some(30.0), Some(8.0), Some(41.0)]),
    ("dayo", [None, Some(48.0), Some(10.0), Some(52.0)]),
    ("efe", [Some(17.0), Some(74.0), Some(16.0), Some(70.0)]),
    ("funmi", [Some(9.0), Some(35.0), Some(11.0), Some(38.0)]),
];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// First day of the graded session (YYYY-MM-DD). Defaults to 2024-09-02.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) session_start: Option<NaiveDate>,
    /// `Student ID,Score` sheet replacing JSS 1's first-term examination (out of 100).
    #[arg(long)]
    pub(crate) scores_csv: Option<PathBuf>,
    /// Apply the suggested promotions instead of only previewing them.
    #[arg(long)]
    pub(crate) execute: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        session_start,
        scores_csv,
        execute,
    } = args;

    let session_start = match session_start {
        Some(date) => date,
        None => parse_date(DEFAULT_SESSION_START)
            .map_err(|err| AppError::Engine(EngineError::Invalid(err)))?,
    };

    let store = Arc::new(InMemoryAcademicStore::new());
    let school = seed_sample_school(&store, session_start);
    let notifier = Arc::new(InMemoryNotifier::default());
    let engine = AcademicEngine::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        EngineConfig::default(),
    );

    println!("Academic engine demo");
    println!(
        "Tenant {} | session {} (next {}) | {} students",
        school.tenant,
        school.session,
        school.next_session,
        school.students.len()
    );

    let template =
        engine.save_template(&school.tenant, &ActorId::from("principal"), sample_template())?;
    render_template(&template);

    let imported = load_score_sheets(&store, &school, scores_csv)?;
    if imported {
        println!("Data source: score sheet import for JSS 1 first-term examination");
    } else {
        println!("Data source: built-in sample scores");
    }

    map_exam_types(&engine, &school, &template)?;

    let subject = SubjectId::from(SUBJECT);
    let first_term = &school.terms[0];
    println!("\nFirst-term {SUBJECT} results");
    for (student, _) in &school.students {
        let result = engine.compute_grade(&school.tenant, student, &subject, first_term)?;
        println!(
            "- {}: {} ({}) \"{}\"{}",
            student,
            result.grade.weighted_score,
            result.grade.resolved_grade_label,
            result.grade.resolved_remark,
            if result.completeness_flag() {
                ""
            } else {
                " [incomplete]"
            }
        );
        for line in &result.grade.breakdown {
            println!(
                "    {} x{}: {} exam(s), contributes {}",
                line.name, line.weight, line.exam_count, line.contribution
            );
        }
    }

    println!("\nJSS 1 ranking");
    let ranking = engine.rank_class(
        &school.tenant,
        &ClassId::from("jss1"),
        Some(&subject),
        first_term,
    )?;
    for entry in &ranking {
        println!("  {}. {} ({})", entry.rank, entry.student_id, entry.score);
    }

    let preview = engine.preview_promotions(&school.tenant, &school.session, None)?;
    println!(
        "\nPromotion preview ({} mode): {} promote, {} repeat, {} graduate, {} undecided",
        preview.mode.label(),
        preview.counts.promote,
        preview.counts.repeat,
        preview.counts.graduate,
        preview.counts.none
    );
    for candidate in &preview.candidates {
        render_candidate(candidate);
    }

    if !execute {
        println!("\nRe-run with --execute to apply the suggested promotions");
        return Ok(());
    }

    let decisions: Vec<_> = preview
        .candidates
        .iter()
        .filter_map(decision_for)
        .collect();
    let result = engine
        .execute_promotions(
            &school.tenant,
            &school.session,
            &ActorId::from("registrar"),
            decisions,
        )
        .await?;

    println!(
        "\nPromotion batch: {} submitted, {} succeeded, {} failed, session {}",
        result.submitted,
        result.succeeded,
        result.failed,
        if result.promotion_completed {
            "completed"
        } else {
            "still open"
        }
    );
    for item in result.failures() {
        if let Some(failure) = &item.failure {
            println!("  - {}: {}", item.student_id, failure.reason);
        }
    }

    let events = notifier.events();
    if events.is_empty() {
        println!("Notifications: none dispatched");
    } else {
        println!("Notifications:");
        for event in events {
            let details: Vec<_> = event
                .details
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            println!("  - {} [{}]", event.template, details.join(", "));
        }
    }

    Ok(())
}

fn render_template(template: &GradeTemplate) {
    println!(
        "\nDefault template '{}' out of {}",
        template.name, template.total_marks
    );
    for component in &template.components {
        println!(
            "- {} weight {}{}",
            component.name,
            component.weight,
            if component.is_required {
                " (required)"
            } else {
                ""
            }
        );
    }
    let bands: Vec<_> = template
        .grade_bands
        .iter()
        .map(|band| format!("{} {}-{}", band.label, band.min_score, band.max_score))
        .collect();
    println!("Grade bands: {}", bands.join(" | "));
}

fn render_candidate(candidate: &PromotionCandidate) {
    let average = candidate
        .session_average
        .map(|average| format!("{average}%"))
        .unwrap_or_else(|| "no results".to_string());
    let target = candidate
        .next_class_id
        .as_ref()
        .map(|class| format!(" -> {class}"))
        .unwrap_or_default();
    println!(
        "- {} ({}, {}): {:?}{} over {} term(s)",
        candidate.student_name,
        candidate.class_id,
        average,
        candidate.suggested_action,
        target,
        candidate.terms_counted
    );
}

fn decision_for(candidate: &PromotionCandidate) -> Option<PromotionDecisionInput> {
    let action = match candidate.suggested_action {
        SuggestedAction::Promote => "promote",
        SuggestedAction::Repeat => "repeat",
        SuggestedAction::Graduate => "graduate",
        SuggestedAction::None => return None,
    };
    Some(PromotionDecisionInput {
        student_id: candidate.student_id.clone(),
        action: action.to_string(),
        next_class_id: candidate.next_class_id.clone(),
    })
}

fn exam_header(
    school: &SampleSchool,
    class: &ClassId,
    term: &TermId,
    exam_type: &str,
    total: i64,
) -> Result<ExamHeader, AppError> {
    Ok(ExamHeader {
        tenant: school.tenant.clone(),
        teacher_id: TeacherId::from(TEACHER),
        subject_id: SubjectId::from(SUBJECT),
        class_id: class.clone(),
        term_id: term.clone(),
        exam_type: exam_label(exam_type)?,
        total_marks: Points::whole(total),
    })
}

fn exam_label(raw: &str) -> Result<ExamTypeLabel, AppError> {
    ExamTypeLabel::parse(raw)
        .ok_or_else(|| EngineError::Invalid(format!("exam type '{raw}' is blank")).into())
}

/// Builds the `Student ID,Score` sheet for one class and one column of [`SCORES`].
fn sample_sheet(school: &SampleSchool, class: &ClassId, column: usize) -> String {
    let mut sheet = String::from("Student ID,Score\n");
    for (student, score) in SCORES.iter().map(|(id, row)| (*id, row[column])) {
        let enrolled = school
            .students
            .iter()
            .any(|(id, enrolled_in)| id.as_str() == student && enrolled_in == class);
        if !enrolled {
            continue;
        }
        let score = score.map(|value| value.to_string()).unwrap_or_default();
        sheet.push_str(&format!("{student},{score}\n"));
    }
    sheet
}

/// Stores a quiz and an examination per class for the first two terms. Returns whether
/// a score sheet file replaced the built-in scores.
fn load_score_sheets(
    store: &InMemoryAcademicStore,
    school: &SampleSchool,
    scores_csv: Option<PathBuf>,
) -> Result<bool, AppError> {
    let classes = [ClassId::from("jss1"), ClassId::from("jss3")];
    let mut imported = false;

    for (term_index, term) in school.terms.iter().take(2).enumerate() {
        for class in &classes {
            for (offset, (exam_type, total)) in EXAM_TYPES.into_iter().zip([20, 100]).enumerate() {
                let header = exam_header(school, class, term, exam_type, total)?;
                let replace = term_index == 0 && offset == 1 && class.as_str() == "jss1";
                let sheet: ImportedScoreSheet = match (&scores_csv, replace) {
                    (Some(path), true) => {
                        imported = true;
                        ScoreSheetImporter::from_path(path, header)?
                    }
                    _ => {
                        let csv = sample_sheet(school, class, term_index * 2 + offset);
                        ScoreSheetImporter::from_reader(csv.as_bytes(), header)?
                    }
                };
                if !sheet.ungraded.is_empty() {
                    println!(
                        "{} {} {}: {} student(s) without a score",
                        class,
                        term,
                        exam_type,
                        sheet.ungraded.len()
                    );
                }
                store
                    .insert_exam(sheet.exam, sheet.grades)
                    .map_err(EngineError::from)?;
            }
        }
    }

    Ok(imported)
}

fn map_exam_types<R, N>(
    engine: &AcademicEngine<R, N>,
    school: &SampleSchool,
    template: &GradeTemplate,
) -> Result<(), AppError>
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let teacher = TeacherId::from(TEACHER);
    for term in school.terms.iter().take(2) {
        for (component, exam_type) in template.components.iter().zip(EXAM_TYPES) {
            engine.upsert_mapping(
                &school.tenant,
                &teacher,
                MappingDraft {
                    subject_id: SubjectId::from(SUBJECT),
                    term_id: term.clone(),
                    exam_type: exam_label(exam_type)?,
                    component_id: component.id.clone(),
                    include_in_calculation: true,
                },
            )?;
        }
    }
    Ok(())
}
