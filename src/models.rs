use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    #[serde(rename = "absent_8h_10h")]
    Absent8h10h,
    #[serde(rename = "absent_10h_12h")]
    Absent10h12h,
    #[serde(rename = "absent_12h_14h")]
    Absent12h14h,
}

impl AttendanceStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "absent_8h_10h" => Some(Self::Absent8h10h),
            "absent_10h_12h" => Some(Self::Absent10h12h),
            "absent_12h_14h" => Some(Self::Absent12h14h),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Absent8h10h => "absent_8h_10h",
            Self::Absent10h12h => "absent_10h_12h",
            Self::Absent12h14h => "absent_12h_14h",
        }
    }

    /// Every `absent*` variant, including partial-day slots, counts as an absence.
    pub fn is_absence(&self) -> bool {
        matches!(
            self,
            Self::Absent | Self::Absent8h10h | Self::Absent10h12h | Self::Absent12h14h
        )
    }
}

/// One attendance row as read from storage. Missing or unrecognised fields
/// stay `None` and the record is ignored during evaluation.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub student_id: Uuid,
    pub date: Option<NaiveDate>,
    pub status: Option<AttendanceStatus>,
}

/// One grade on the 0-20 scale.
#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub grade: Option<f64>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskKind {
    Absenteeism,
    Academic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcademicAlert {
    pub subject: String,
    pub last_note: f64,
    pub prev_note: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskItem {
    #[serde(rename = "type")]
    pub kind: RiskKind,
    pub label: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<AcademicAlert>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub student_id: Uuid,
    pub recent_absences: u32,
    pub risks: Vec<RiskItem>,
    pub is_at_risk: bool,
}

impl RiskAssessment {
    pub fn new(student_id: Uuid, recent_absences: u32, risks: Vec<RiskItem>) -> Self {
        let is_at_risk = !risks.is_empty();
        Self {
            student_id,
            recent_absences,
            risks,
            is_at_risk,
        }
    }
}

/// Presentation-only identity of a student; never read by the risk logic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentMeta {
    pub id: Uuid,
    pub name: String,
    pub matricule: String,
    pub photo_url: Option<String>,
    pub class_name: Option<String>,
    pub class_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRiskReport {
    #[serde(flatten)]
    pub student: StudentMeta,
    #[serde(flatten)]
    pub assessment: RiskAssessment,
}

#[derive(Debug, Clone)]
pub struct RiskKindSummary {
    pub kind: RiskKind,
    pub count: usize,
}
