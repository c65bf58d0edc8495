mod parser;

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::domain::{
    next_identifier, ClassId, Exam, ExamId, ExamTypeLabel, Points, RawGrade, StudentId,
    SubjectId, TeacherId, TenantId, TermId,
};

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidTotal { total: Points },
    BlankStudent { row: usize },
    InvalidScore { row: usize, value: String },
    ScoreOutOfRange { row: usize, score: Points, total: Points },
    DuplicateStudent { row: usize, student: String },
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read score sheet: {}", err),
            ImportError::Csv(err) => write!(f, "invalid score sheet CSV data: {}", err),
            ImportError::InvalidTotal { total } => {
                write!(f, "exam total marks must be positive (found {total})")
            }
            ImportError::BlankStudent { row } => write!(f, "row {row}: student id is blank"),
            ImportError::InvalidScore { row, value } => {
                write!(f, "row {row}: score '{value}' is not a number")
            }
            ImportError::ScoreOutOfRange { row, score, total } => {
                write!(f, "row {row}: score {score} is outside 0..={total}")
            }
            ImportError::DuplicateStudent { row, student } => {
                write!(f, "row {row}: student {student} is listed more than once")
            }
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Everything about an exam except its scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamHeader {
    pub tenant: TenantId,
    pub teacher_id: TeacherId,
    pub subject_id: SubjectId,
    pub class_id: ClassId,
    pub term_id: TermId,
    pub exam_type: ExamTypeLabel,
    pub total_marks: Points,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedScoreSheet {
    pub exam: Exam,
    pub grades: Vec<RawGrade>,
    /// Students listed without a score.
    pub ungraded: Vec<StudentId>,
}

/// Reads one exam's scores from a `Student ID,Score` sheet.
pub struct ScoreSheetImporter;

impl ScoreSheetImporter {
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        header: ExamHeader,
    ) -> Result<ImportedScoreSheet, ImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, header)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        header: ExamHeader,
    ) -> Result<ImportedScoreSheet, ImportError> {
        if header.total_marks <= Points::ZERO {
            return Err(ImportError::InvalidTotal {
                total: header.total_marks,
            });
        }

        let exam = Exam {
            id: ExamId(next_identifier("exam")),
            tenant: header.tenant,
            teacher_id: header.teacher_id,
            subject_id: header.subject_id,
            class_id: header.class_id,
            term_id: header.term_id,
            exam_type: header.exam_type,
            total_marks: header.total_marks,
        };

        let mut seen = HashSet::new();
        let mut grades = Vec::new();
        let mut ungraded = Vec::new();

        for row in parser::parse_rows(reader)? {
            if row.student_id.is_empty() {
                return Err(ImportError::BlankStudent { row: row.row });
            }
            if !seen.insert(row.student_id.clone()) {
                return Err(ImportError::DuplicateStudent {
                    row: row.row,
                    student: row.student_id,
                });
            }

            let student_id = StudentId(row.student_id);
            let Some(raw) = row.score else {
                ungraded.push(student_id);
                continue;
            };

            let score = raw
                .parse::<f64>()
                .ok()
                .and_then(Points::from_f64)
                .ok_or_else(|| ImportError::InvalidScore {
                    row: row.row,
                    value: raw.clone(),
                })?;
            if score < Points::ZERO || score > exam.total_marks {
                return Err(ImportError::ScoreOutOfRange {
                    row: row.row,
                    score,
                    total: exam.total_marks,
                });
            }

            grades.push(RawGrade {
                exam_id: exam.id.clone(),
                student_id,
                score,
            });
        }

        Ok(ImportedScoreSheet {
            exam,
            grades,
            ungraded,
        })
    }
}
