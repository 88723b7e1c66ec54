use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use crate::models::{
    AcademicAlert, AttendanceRecord, GradeRecord, RiskAssessment, RiskItem, RiskKind, Severity,
    StudentMeta, StudentRiskReport,
};

pub const RECENT_ABSENCE_WINDOW_DAYS: i64 = 30;
pub const ABSENCE_ALERT_THRESHOLD: u32 = 3;
pub const LOW_GRADE_THRESHOLD: f64 = 10.0;
pub const GRADE_SCALE_MAX: f64 = 20.0;
pub const ABSENTEEISM_LABEL: &str = "Absences élevées";
pub const ACADEMIC_LABEL_PREFIX: &str = "Chute en ";

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRisk {
    pub recent_absences: u32,
    pub risk: Option<RiskItem>,
}

/// Exclusive lower bound of the recent absence window.
pub fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RECENT_ABSENCE_WINDOW_DAYS)
}

/// Calendar dates are compared at midnight UTC. The window ends at `now`.
pub fn is_recent(date: NaiveDate, now: DateTime<Utc>) -> bool {
    let instant = date.and_time(NaiveTime::MIN).and_utc();
    instant > window_start(now) && instant <= now
}

pub fn evaluate_attendance<'a, I>(records: I, now: DateTime<Utc>) -> AttendanceRisk
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    let count = records
        .into_iter()
        .filter(|record| match (record.date, record.status) {
            (Some(date), Some(status)) => status.is_absence() && is_recent(date, now),
            _ => {
                tracing::debug!(
                    student_id = %record.student_id,
                    "skipping undated or unrecognised attendance record"
                );
                false
            }
        })
        .count();
    let recent_absences = u32::try_from(count).unwrap_or(u32::MAX);

    let risk = (recent_absences >= ABSENCE_ALERT_THRESHOLD).then(|| RiskItem {
        kind: RiskKind::Absenteeism,
        label: ABSENTEEISM_LABEL.to_string(),
        severity: Severity::High,
        details: None,
    });

    AttendanceRisk {
        recent_absences,
        risk,
    }
}

fn gradeable(grade: Option<f64>) -> Option<f64> {
    grade.filter(|value| value.is_finite() && (0.0..=GRADE_SCALE_MAX).contains(value))
}

struct DatedGrade<'a> {
    date: NaiveDate,
    grade: f64,
    subject: &'a str,
}

/// Reports at most one pair of date-adjacent sub-10 grades per subject.
///
/// Each subject's grades are ordered newest first before pairing, so the most
/// recent qualifying pair wins. Grades sharing a date keep their input order.
/// Subjects are reported in order of first appearance. Grades dated after
/// `now` are ignored.
pub fn academic_alerts<'a, I>(grades: I, now: DateTime<Utc>) -> Vec<AcademicAlert>
where
    I: IntoIterator<Item = &'a GradeRecord>,
{
    let today = now.date_naive();
    let mut subject_order: Vec<Uuid> = Vec::new();
    let mut by_subject: HashMap<Uuid, Vec<DatedGrade<'a>>> = HashMap::new();

    for record in grades {
        let (Some(date), Some(grade)) = (record.date, gradeable(record.grade)) else {
            tracing::debug!(
                student_id = %record.student_id,
                subject_id = %record.subject_id,
                "skipping ungradeable or undated grade"
            );
            continue;
        };
        if date > today {
            continue;
        }

        by_subject
            .entry(record.subject_id)
            .or_insert_with(|| {
                subject_order.push(record.subject_id);
                Vec::new()
            })
            .push(DatedGrade {
                date,
                grade,
                subject: &record.subject_name,
            });
    }

    let mut alerts = Vec::new();
    for subject_id in subject_order {
        let Some(mut entries) = by_subject.remove(&subject_id) else {
            continue;
        };
        entries.sort_by(|a, b| b.date.cmp(&a.date));

        let pair = entries
            .windows(2)
            .find(|pair| pair[0].grade < LOW_GRADE_THRESHOLD && pair[1].grade < LOW_GRADE_THRESHOLD);

        if let Some(pair) = pair {
            alerts.push(AcademicAlert {
                subject: pair[0].subject.to_string(),
                last_note: pair[0].grade,
                prev_note: pair[1].grade,
            });
        }
    }

    alerts
}

pub fn evaluate_academic<'a, I>(grades: I, now: DateTime<Utc>) -> Option<RiskItem>
where
    I: IntoIterator<Item = &'a GradeRecord>,
{
    let alerts = academic_alerts(grades, now);
    if alerts.is_empty() {
        return None;
    }

    let mut subjects: Vec<&str> = Vec::new();
    for alert in &alerts {
        if !subjects.contains(&alert.subject.as_str()) {
            subjects.push(&alert.subject);
        }
    }

    Some(RiskItem {
        kind: RiskKind::Academic,
        label: format!("{ACADEMIC_LABEL_PREFIX}{}", subjects.join(", ")),
        severity: Severity::Medium,
        details: Some(alerts),
    })
}

/// Combines both evaluators for one student. The caller passes only that
/// student's records.
pub fn assess_student<'a, A, G>(
    student_id: Uuid,
    attendance: A,
    grades: G,
    now: DateTime<Utc>,
) -> RiskAssessment
where
    A: IntoIterator<Item = &'a AttendanceRecord>,
    G: IntoIterator<Item = &'a GradeRecord>,
{
    let attendance_risk = evaluate_attendance(attendance, now);
    let academic_risk = evaluate_academic(grades, now);

    let risks = attendance_risk
        .risk
        .into_iter()
        .chain(academic_risk)
        .collect();

    RiskAssessment::new(student_id, attendance_risk.recent_absences, risks)
}

/// Assesses every listed student against school-wide record sets.
/// Output keeps the order of `students`.
pub fn assess_school(
    students: &[StudentMeta],
    attendance: &[AttendanceRecord],
    grades: &[GradeRecord],
    now: DateTime<Utc>,
) -> Vec<StudentRiskReport> {
    let mut attendance_by_student: HashMap<Uuid, Vec<&AttendanceRecord>> = HashMap::new();
    for record in attendance {
        attendance_by_student
            .entry(record.student_id)
            .or_default()
            .push(record);
    }

    let mut grades_by_student: HashMap<Uuid, Vec<&GradeRecord>> = HashMap::new();
    for record in grades {
        grades_by_student
            .entry(record.student_id)
            .or_default()
            .push(record);
    }

    students
        .iter()
        .map(|student| {
            let assessment = assess_student(
                student.id,
                attendance_by_student.get(&student.id).into_iter().flatten().copied(),
                grades_by_student.get(&student.id).into_iter().flatten().copied(),
                now,
            );
            StudentRiskReport {
                student: student.clone(),
                assessment,
            }
        })
        .collect()
}

/// Orders by recent absences, most first, and drops students not at risk.
/// Equal counts keep their incoming order.
pub fn rank_at_risk(mut reports: Vec<StudentRiskReport>) -> Vec<StudentRiskReport> {
    reports.sort_by(|a, b| {
        b.assessment
            .recent_absences
            .cmp(&a.assessment.recent_absences)
    });
    reports.retain(|report| report.assessment.is_at_risk);
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap()
    }

    fn days_ago(days: i64) -> NaiveDate {
        now().date_naive() - Duration::days(days)
    }

    fn absence(student_id: Uuid, days: i64) -> AttendanceRecord {
        AttendanceRecord {
            student_id,
            date: Some(days_ago(days)),
            status: Some(AttendanceStatus::Absent),
        }
    }

    fn grade(student_id: Uuid, subject_id: Uuid, subject: &str, value: f64, days: i64) -> GradeRecord {
        GradeRecord {
            student_id,
            subject_id,
            subject_name: subject.to_string(),
            grade: Some(value),
            date: Some(days_ago(days)),
        }
    }

    fn meta(id: Uuid, name: &str) -> StudentMeta {
        StudentMeta {
            id,
            name: name.to_string(),
            matricule: format!("MAT-{name}"),
            photo_url: None,
            class_name: Some("5e B".to_string()),
            class_level: Some("5e".to_string()),
        }
    }

    #[test]
    fn window_excludes_boundary_day() {
        let midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        let boundary = midnight.date_naive() - Duration::days(30);
        assert!(!is_recent(boundary, midnight));
        assert!(is_recent(boundary + Duration::days(1), midnight));
        assert!(is_recent(midnight.date_naive(), midnight));
    }

    #[test]
    fn absences_after_evaluation_time_are_ignored() {
        let id = Uuid::new_v4();
        let later = |days: i64| AttendanceRecord {
            student_id: id,
            date: Some(now().date_naive() + Duration::days(days)),
            status: Some(AttendanceStatus::Absent),
        };
        let records = vec![later(1), later(20), later(40), absence(id, 0)];

        let result = evaluate_attendance(&records, now());
        assert_eq!(result.recent_absences, 1);
        assert!(result.risk.is_none());
    }

    #[test]
    fn grades_after_evaluation_time_are_ignored() {
        let student = Uuid::new_v4();
        let math = Uuid::new_v4();
        let grades = vec![
            grade(student, math, "Math", 4.0, -10),
            grade(student, math, "Math", 5.0, -3),
            grade(student, math, "Math", 14.0, 2),
            grade(student, math, "Math", 8.0, 6),
        ];

        assert!(academic_alerts(&grades, now()).is_empty());

        // The same history seen a fortnight later does pair the two low grades.
        let later = now() + Duration::days(14);
        let alerts = academic_alerts(&grades, later);
        assert_eq!(alerts.len(), 1);
        assert_eq!((alerts[0].last_note, alerts[0].prev_note), (4.0, 5.0));
    }

    #[test]
    fn counts_only_recent_absence_variants() {
        let id = Uuid::new_v4();
        let records = vec![
            absence(id, 1),
            AttendanceRecord {
                student_id: id,
                date: Some(days_ago(2)),
                status: Some(AttendanceStatus::Absent8h10h),
            },
            AttendanceRecord {
                student_id: id,
                date: Some(days_ago(3)),
                status: Some(AttendanceStatus::Late),
            },
            AttendanceRecord {
                student_id: id,
                date: Some(days_ago(4)),
                status: Some(AttendanceStatus::Present),
            },
            AttendanceRecord {
                student_id: id,
                date: None,
                status: Some(AttendanceStatus::Absent),
            },
            AttendanceRecord {
                student_id: id,
                date: Some(days_ago(5)),
                status: None,
            },
            absence(id, 30),
            absence(id, 45),
        ];

        let result = evaluate_attendance(&records, now());
        assert_eq!(result.recent_absences, 2);
        assert!(result.risk.is_none());
    }

    #[test]
    fn three_recent_absences_raise_high_risk() {
        let id = Uuid::new_v4();
        let records = vec![absence(id, 1), absence(id, 10), absence(id, 29)];

        let result = evaluate_attendance(&records, now());
        assert_eq!(result.recent_absences, 3);
        let risk = result.risk.unwrap();
        assert_eq!(risk.kind, RiskKind::Absenteeism);
        assert_eq!(risk.severity, Severity::High);
        assert_eq!(risk.label, "Absences élevées");
    }

    #[test]
    fn empty_attendance_is_clean() {
        let records: Vec<AttendanceRecord> = Vec::new();
        let result = evaluate_attendance(&records, now());
        assert_eq!(result.recent_absences, 0);
        assert!(result.risk.is_none());
    }

    #[test]
    fn scenario_a_absences_only() {
        let id = Uuid::new_v4();
        let attendance = vec![absence(id, 2), absence(id, 5), absence(id, 9)];

        let grades: Vec<GradeRecord> = Vec::new();
        let assessment = assess_student(id, &attendance, &grades, now());
        assert_eq!(assessment.recent_absences, 3);
        assert_eq!(assessment.risks.len(), 1);
        assert_eq!(assessment.risks[0].kind, RiskKind::Absenteeism);
        assert_eq!(assessment.risks[0].severity, Severity::High);
        assert!(assessment.is_at_risk);
    }

    #[test]
    fn scenario_b_first_pair_stops_the_scan() {
        let student = Uuid::new_v4();
        let math = Uuid::new_v4();
        // Inserted oldest first to show ordering comes from dates.
        let grades = vec![
            grade(student, math, "Math", 15.0, 20),
            grade(student, math, "Math", 7.0, 10),
            grade(student, math, "Math", 8.0, 1),
        ];

        let alerts = academic_alerts(&grades, now());
        assert_eq!(
            alerts,
            vec![AcademicAlert {
                subject: "Math".to_string(),
                last_note: 8.0,
                prev_note: 7.0,
            }]
        );
    }

    #[test]
    fn scenario_c_skips_pair_with_passing_grade() {
        let student = Uuid::new_v4();
        let math = Uuid::new_v4();
        let grades = vec![
            grade(student, math, "Math", 12.0, 1),
            grade(student, math, "Math", 8.0, 5),
            grade(student, math, "Math", 6.0, 9),
        ];

        let alerts = academic_alerts(&grades, now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].last_note, 8.0);
        assert_eq!(alerts[0].prev_note, 6.0);
    }

    #[test]
    fn scenario_d_nothing_to_report() {
        let student = Uuid::new_v4();
        let math = Uuid::new_v4();
        let attendance = vec![absence(student, 3), absence(student, 12)];
        let grades = vec![
            grade(student, math, "Math", 10.0, 1),
            grade(student, math, "Math", 14.5, 6),
        ];

        let assessment = assess_student(student, &attendance, &grades, now());
        assert_eq!(assessment.recent_absences, 2);
        assert!(assessment.risks.is_empty());
        assert!(!assessment.is_at_risk);
    }

    #[test]
    fn one_alert_per_subject_and_label_lists_subjects() {
        let student = Uuid::new_v4();
        let french = Uuid::new_v4();
        let physics = Uuid::new_v4();
        let history = Uuid::new_v4();
        let grades = vec![
            grade(student, french, "Français", 4.0, 1),
            grade(student, french, "Français", 5.0, 2),
            grade(student, french, "Français", 3.0, 3),
            grade(student, french, "Français", 2.0, 4),
            grade(student, physics, "Physique", 9.5, 2),
            grade(student, physics, "Physique", 9.0, 8),
            grade(student, history, "Histoire", 6.0, 1),
        ];

        let risk = evaluate_academic(&grades, now()).unwrap();
        assert_eq!(risk.kind, RiskKind::Academic);
        assert_eq!(risk.severity, Severity::Medium);
        assert_eq!(risk.label, "Chute en Français, Physique");

        let details = risk.details.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].last_note, 4.0);
        assert_eq!(details[0].prev_note, 5.0);
        assert_eq!(details[1].subject, "Physique");
    }

    #[test]
    fn subjects_sharing_a_name_are_labelled_once() {
        let student = Uuid::new_v4();
        let group_a = Uuid::new_v4();
        let group_b = Uuid::new_v4();
        let grades = vec![
            grade(student, group_a, "Anglais", 5.0, 1),
            grade(student, group_a, "Anglais", 6.0, 2),
            grade(student, group_b, "Anglais", 7.0, 1),
            grade(student, group_b, "Anglais", 8.0, 2),
        ];

        let risk = evaluate_academic(&grades, now()).unwrap();
        assert_eq!(risk.label, "Chute en Anglais");
        assert_eq!(risk.details.unwrap().len(), 2);
    }

    #[test]
    fn equal_dates_keep_input_order() {
        let student = Uuid::new_v4();
        let math = Uuid::new_v4();
        let grades = vec![
            grade(student, math, "Math", 9.0, 3),
            grade(student, math, "Math", 4.0, 3),
            grade(student, math, "Math", 18.0, 1),
        ];

        let alerts = academic_alerts(&grades, now());
        assert_eq!(alerts[0].last_note, 9.0);
        assert_eq!(alerts[0].prev_note, 4.0);
    }

    #[test]
    fn ungradeable_records_are_skipped() {
        let student = Uuid::new_v4();
        let math = Uuid::new_v4();
        let mut missing = grade(student, math, "Math", 0.0, 2);
        missing.grade = None;
        let mut undated = grade(student, math, "Math", 3.0, 3);
        undated.date = None;
        let grades = vec![
            grade(student, math, "Math", 8.0, 1),
            missing,
            undated,
            grade(student, math, "Math", f64::NAN, 4),
            grade(student, math, "Math", 25.0, 5),
            grade(student, math, "Math", 12.0, 6),
        ];

        // Once the malformed rows are dropped, 8 sits next to 12.
        assert!(academic_alerts(&grades, now()).is_empty());
    }

    #[test]
    fn single_grade_subject_contributes_nothing() {
        let student = Uuid::new_v4();
        let grades = vec![grade(student, Uuid::new_v4(), "SVT", 2.0, 1)];
        assert!(evaluate_academic(&grades, now()).is_none());
    }

    #[test]
    fn assessment_is_idempotent() {
        let student = Uuid::new_v4();
        let math = Uuid::new_v4();
        let attendance = vec![absence(student, 1), absence(student, 2), absence(student, 3)];
        let grades = vec![
            grade(student, math, "Math", 5.0, 1),
            grade(student, math, "Math", 6.0, 2),
        ];

        let first = assess_student(student, &attendance, &grades, now());
        let second = assess_student(student, &attendance, &grades, now());
        assert_eq!(first, second);
        assert_eq!(first.risks.len(), 2);
        assert_eq!(first.risks[0].kind, RiskKind::Absenteeism);
        assert_eq!(first.risks[1].kind, RiskKind::Academic);
    }

    #[test]
    fn scenario_e_batch_ranks_and_filters() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let students = vec![meta(a, "Aminata"), meta(b, "Bakary"), meta(c, "Coumba")];

        let mut attendance = Vec::new();
        for day in 1..=5 {
            attendance.push(absence(a, day));
        }
        for day in 1..=3 {
            attendance.push(absence(c, day));
        }

        let reports = assess_school(&students, &attendance, &[], now());
        assert_eq!(reports.len(), 3);
        assert!(!reports[1].assessment.is_at_risk);

        let ranked = rank_at_risk(reports);
        let counts: Vec<u32> = ranked
            .iter()
            .map(|report| report.assessment.recent_absences)
            .collect();
        assert_eq!(counts, vec![5, 3]);
        assert_eq!(ranked[0].student.id, a);
        assert_eq!(ranked[1].student.id, c);
    }

    #[test]
    fn ranking_ties_keep_incoming_order() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let students = vec![meta(a, "A"), meta(b, "B"), meta(c, "C")];
        let mut attendance = Vec::new();
        for id in [a, b, c] {
            for day in 1..=3 {
                attendance.push(absence(id, day));
            }
        }
        attendance.push(absence(c, 4));

        let ranked = rank_at_risk(assess_school(&students, &attendance, &[], now()));
        let ids: Vec<Uuid> = ranked.iter().map(|report| report.student.id).collect();
        assert_eq!(ids, vec![c, a, b]);
    }

    #[test]
    fn batch_keeps_students_records_apart() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let math = Uuid::new_v4();
        let students = vec![meta(a, "A"), meta(b, "B")];
        // Interleaved low grades from two students must not pair up.
        let grades = vec![
            grade(a, math, "Math", 5.0, 1),
            grade(b, math, "Math", 6.0, 2),
            grade(a, math, "Math", 15.0, 3),
            grade(b, math, "Math", 16.0, 4),
        ];

        let reports = assess_school(&students, &[], &grades, now());
        assert!(reports.iter().all(|report| !report.assessment.is_at_risk));
    }
}
