use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::normalizer::normalize_label;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier!(
    /// One school; the unit of data isolation.
    TenantId
);
identifier!(
    /// Authenticated teacher or administrator performing a mutation.
    ActorId
);
identifier!(TeacherId);
identifier!(SubjectId);
identifier!(StudentId);
identifier!(ClassId);
identifier!(SessionId);
identifier!(TermId);
identifier!(TemplateId);
identifier!(ComponentId);
identifier!(MappingId);
identifier!(ExamId);
identifier!(HistoryId);

static ENTITY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier with a readable prefix, e.g. `tpl-000042`.
pub(crate) fn next_identifier(prefix: &str) -> String {
    let id = ENTITY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

/// Fixed-point mark value stored in hundredths.
///
/// Weights, band bounds and computed scores all live at two-decimal resolution so that
/// configuration checks ("weights sum to 100", "bands are contiguous") are exact integer
/// comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);
    pub const HUNDRED: Points = Points(10_000);
    /// Smallest representable step; adjacent bands are exactly this far apart.
    pub const STEP: Points = Points(1);
    /// Largest magnitude accepted from outside; keeps sums of request values far from `i64`
    /// overflow.
    pub const MAX: Points = Points(1_000_000_000_000);

    pub const fn from_hundredths(hundredths: i64) -> Self {
        Self(hundredths)
    }

    pub const fn whole(value: i64) -> Self {
        Self(value * 100)
    }

    /// Round half-up to two decimals. The small bias absorbs binary representation error,
    /// so `79.995` becomes `80.00` even though it is stored as `79.99499..`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * 100.0 + 0.5 + 1e-9).floor();
        if scaled.abs() > Self::MAX.0 as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    pub const fn hundredths(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn clamp_to(self, min: Points, max: Points) -> Points {
        Points(self.0.clamp(min.0, max.0))
    }

    /// Express `self` as a percentage of `total`, rounded half-up to two decimals.
    pub fn percentage_of(self, total: Points) -> Points {
        if total.0 <= 0 {
            return Points::ZERO;
        }
        let numerator = i128::from(self.0) * 10_000 * 2 + i128::from(total.0);
        let denominator = i128::from(total.0) * 2;
        Points(numerator.div_euclid(denominator) as i64)
    }

    /// Mean of the given values, rounded half-up. `None` when empty.
    pub fn mean<I>(values: I) -> Option<Points>
    where
        I: IntoIterator<Item = Points>,
    {
        let (sum, count) = values
            .into_iter()
            .fold((0_i128, 0_i128), |(sum, count), value| {
                (sum + i128::from(value.0), count + 1)
            });
        if count == 0 {
            return None;
        }
        Some(Points((sum * 2 + count).div_euclid(count * 2) as i64))
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Points {
    type Output = Points;

    fn add(self, rhs: Points) -> Points {
        Points(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Points {
    type Output = Points;

    fn sub(self, rhs: Points) -> Points {
        Points(self.0.saturating_sub(rhs.0))
    }
}

impl std::iter::Sum for Points {
    fn sum<I: Iterator<Item = Points>>(iter: I) -> Points {
        iter.fold(Points::ZERO, |acc, value| acc + value)
    }
}

impl Serialize for Points {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Points::from_f64(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("'{raw}' is not a finite mark value within {}", Points::MAX)))
    }
}

/// Teacher-defined exam type, normalized so spacing and case variants compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ExamTypeLabel(String);

impl ExamTypeLabel {
    /// `None` when the label is blank after normalization.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize_label(raw);
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExamTypeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ExamTypeLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ExamTypeLabel::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom("exam type label must not be blank"))
    }
}

/// A class (form/grade level, optionally split into arms) students are enrolled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolClass {
    pub id: ClassId,
    pub tenant: TenantId,
    pub name: String,
    /// Position in the tenant's class hierarchy; higher levels follow lower ones.
    pub level: u16,
    #[serde(default)]
    pub arm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub tenant: TenantId,
    pub name: String,
    pub current_class_id: ClassId,
    pub is_active: bool,
}

/// A school year, divided into terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicSession {
    pub id: SessionId,
    pub tenant: TenantId,
    pub name: String,
    pub starts_on: NaiveDate,
    pub is_current: bool,
    pub promotion_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub tenant: TenantId,
    pub session_id: SessionId,
    pub name: String,
    pub sequence_number: u8,
    pub is_current: bool,
}

/// A scored assessment instance owned by the teacher who created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    pub tenant: TenantId,
    pub teacher_id: TeacherId,
    pub subject_id: SubjectId,
    pub class_id: ClassId,
    pub term_id: TermId,
    pub exam_type: ExamTypeLabel,
    pub total_marks: Points,
}

/// One student's raw score on one exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGrade {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub score: Points,
}

/// End-of-session outcome for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionAction {
    Promote,
    Repeat,
    Graduate,
    Transfer,
}

impl PromotionAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::Repeat => "repeat",
            Self::Graduate => "graduate",
            Self::Transfer => "transfer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "promote" => Some(Self::Promote),
            "repeat" => Some(Self::Repeat),
            "graduate" => Some(Self::Graduate),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }

    /// Whether the action names the class the student moves into.
    pub const fn requires_next_class(self) -> bool {
        matches!(self, Self::Promote | Self::Transfer)
    }

    /// Whether applying the action opens an enrollment in the following session.
    pub const fn opens_enrollment(self) -> bool {
        !matches!(self, Self::Graduate)
    }

    pub const fn closing_status(self) -> EnrollmentStatus {
        match self {
            Self::Promote => EnrollmentStatus::Promoted,
            Self::Repeat => EnrollmentStatus::Repeated,
            Self::Graduate => EnrollmentStatus::Graduated,
            Self::Transfer => EnrollmentStatus::Transferred,
        }
    }
}

impl fmt::Display for PromotionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Promoted,
    Repeated,
    Graduated,
    Transferred,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Promoted => "promoted",
            Self::Repeated => "repeated",
            Self::Graduated => "graduated",
            Self::Transferred => "transferred",
        }
    }
}

/// Durable record of one enrollment episode; the promotion executor closes and opens these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentClassHistory {
    pub id: HistoryId,
    pub tenant: TenantId,
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub session_id: SessionId,
    pub term_id: TermId,
    pub enrollment_date: NaiveDate,
    pub completion_date: Option<NaiveDate>,
    pub is_current: bool,
    pub status: EnrollmentStatus,
    pub promoted_to_class_id: Option<ClassId>,
    pub final_average: Option<Points>,
    pub promotion_eligible: Option<bool>,
    pub promotion_decision: Option<PromotionAction>,
    pub decided_by: Option<ActorId>,
    pub decision_date: Option<DateTime<Utc>>,
}

impl StudentClassHistory {
    /// Fresh, current enrollment row.
    pub fn enroll(
        tenant: TenantId,
        student_id: StudentId,
        class_id: ClassId,
        session_id: SessionId,
        term_id: TermId,
        enrollment_date: NaiveDate,
    ) -> Self {
        Self {
            id: HistoryId(next_identifier("hist")),
            tenant,
            student_id,
            class_id,
            session_id,
            term_id,
            enrollment_date,
            completion_date: None,
            is_current: true,
            status: EnrollmentStatus::Active,
            promoted_to_class_id: None,
            final_average: None,
            promotion_eligible: None,
            promotion_decision: None,
            decided_by: None,
            decision_date: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.promotion_decision.is_some()
    }
}
