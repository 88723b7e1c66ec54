use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::RecordSource;
use crate::error::RiskError;
use crate::models::StudentRiskReport;
use crate::risk;

/// Which students a fetch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskScope {
    School(Uuid),
    /// A supplied school restricts the lookup to that tenant.
    Student {
        student_id: Uuid,
        school_id: Option<Uuid>,
    },
}

impl RiskScope {
    pub fn resolve(school_id: Option<Uuid>, student_id: Option<Uuid>) -> Result<Self, RiskError> {
        match (school_id, student_id) {
            (school_id, Some(student_id)) => Ok(RiskScope::Student {
                student_id,
                school_id,
            }),
            (Some(school_id), None) => Ok(RiskScope::School(school_id)),
            (None, None) => Err(RiskError::InvalidIdentifier),
        }
    }
}

/// Admin Sentinelle listing: at-risk students only, most recent absences first.
pub async fn produce_school_risk_report(
    source: &dyn RecordSource,
    school_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Vec<StudentRiskReport>, RiskError> {
    let school_id = school_id.ok_or(RiskError::InvalidIdentifier)?;
    let scope = RiskScope::School(school_id);

    let (students, attendance, grades) = tokio::try_join!(
        source.student_meta(&scope),
        source.attendance(&scope),
        source.grades(&scope),
    )
    .map_err(RiskError::InputUnavailable)?;

    let assessed = risk::assess_school(&students, &attendance, &grades, now);
    let ranked = risk::rank_at_risk(assessed);

    tracing::info!(
        %school_id,
        students = students.len(),
        at_risk = ranked.len(),
        "school risk report computed"
    );

    Ok(ranked)
}

/// Public single-student lookup. The assessment is returned whether or not
/// the student is at risk; `None` means no such student in scope.
pub async fn produce_student_risk_report(
    source: &dyn RecordSource,
    scope: RiskScope,
    now: DateTime<Utc>,
) -> Result<Option<StudentRiskReport>, RiskError> {
    let RiskScope::Student { student_id, .. } = scope else {
        return Err(RiskError::InvalidIdentifier);
    };

    let (students, attendance, grades) = tokio::try_join!(
        source.student_meta(&scope),
        source.attendance(&scope),
        source.grades(&scope),
    )
    .map_err(RiskError::InputUnavailable)?;

    let Some(student) = students.into_iter().find(|student| student.id == student_id) else {
        tracing::info!(%student_id, "student not found in scope");
        return Ok(None);
    };

    let assessment = risk::assess_student(
        student_id,
        attendance.iter().filter(|record| record.student_id == student_id),
        grades.iter().filter(|record| record.student_id == student_id),
        now,
    );

    tracing::info!(
        %student_id,
        recent_absences = assessment.recent_absences,
        at_risk = assessment.is_at_risk,
        "student risk report computed"
    );

    Ok(Some(StudentRiskReport {
        student,
        assessment,
    }))
}
