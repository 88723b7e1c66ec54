use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::engine::RiskScope;
use crate::models::{AttendanceRecord, AttendanceStatus, GradeRecord, StudentMeta};

/// Supplies the records the risk engine evaluates. Implementations decide
/// how to fetch; the engine only needs each set restricted to `scope`.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn student_meta(&self, scope: &RiskScope) -> anyhow::Result<Vec<StudentMeta>>;
    async fn attendance(&self, scope: &RiskScope) -> anyhow::Result<Vec<AttendanceRecord>>;
    async fn grades(&self, scope: &RiskScope) -> anyhow::Result<Vec<GradeRecord>>;
}

#[derive(Clone)]
pub struct PgRecordSource {
    pool: PgPool,
}

impl PgRecordSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Filter on the `s` (students) alias plus the ids to bind, in order.
fn scope_filter(scope: &RiskScope) -> (&'static str, Vec<Uuid>) {
    match *scope {
        RiskScope::School(school_id) => ("s.school_id = $1", vec![school_id]),
        RiskScope::Student {
            student_id,
            school_id: None,
        } => ("s.id = $1", vec![student_id]),
        RiskScope::Student {
            student_id,
            school_id: Some(school_id),
        } => ("s.id = $1 AND s.school_id = $2", vec![student_id, school_id]),
    }
}

async fn fetch_scoped(pool: &PgPool, sql: &str, binds: Vec<Uuid>) -> anyhow::Result<Vec<PgRow>> {
    let mut query = sqlx::query(sql);
    for id in binds {
        query = query.bind(id);
    }
    Ok(query.fetch_all(pool).await?)
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn student_meta(&self, scope: &RiskScope) -> anyhow::Result<Vec<StudentMeta>> {
        let (filter, binds) = scope_filter(scope);
        let sql = format!(
            "SELECT s.id, s.full_name, s.matricule, s.photo_url, \
             c.name AS class_name, c.level AS class_level \
             FROM sentinelle.students s \
             LEFT JOIN sentinelle.classes c ON c.id = s.class_id \
             WHERE {filter} \
             ORDER BY s.full_name, s.id"
        );

        let rows = fetch_scoped(&self.pool, &sql, binds)
            .await
            .context("failed to fetch students")?;

        let mut students = Vec::with_capacity(rows.len());
        for row in rows {
            students.push(StudentMeta {
                id: row.try_get("id")?,
                name: row.try_get("full_name")?,
                matricule: row.try_get("matricule")?,
                photo_url: row.try_get("photo_url")?,
                class_name: row.try_get("class_name")?,
                class_level: row.try_get("class_level")?,
            });
        }

        Ok(students)
    }

    async fn attendance(&self, scope: &RiskScope) -> anyhow::Result<Vec<AttendanceRecord>> {
        let (filter, binds) = scope_filter(scope);
        let sql = format!(
            "SELECT a.student_id, a.day, a.status \
             FROM sentinelle.attendance a \
             JOIN sentinelle.students s ON s.id = a.student_id \
             WHERE {filter} \
             ORDER BY a.student_id, a.day DESC, a.id"
        );

        let rows = fetch_scoped(&self.pool, &sql, binds)
            .await
            .context("failed to fetch attendance")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status: Option<String> = row.try_get("status")?;
            records.push(AttendanceRecord {
                student_id: row.try_get("student_id")?,
                date: row.try_get("day")?,
                status: status.as_deref().and_then(AttendanceStatus::parse),
            });
        }

        Ok(records)
    }

    async fn grades(&self, scope: &RiskScope) -> anyhow::Result<Vec<GradeRecord>> {
        let (filter, binds) = scope_filter(scope);
        let sql = format!(
            "SELECT g.student_id, g.subject_id, sub.name AS subject_name, \
             g.grade, g.recorded_on \
             FROM sentinelle.grades g \
             JOIN sentinelle.students s ON s.id = g.student_id \
             JOIN sentinelle.subjects sub ON sub.id = g.subject_id \
             WHERE {filter} \
             ORDER BY g.student_id, g.subject_id, g.recorded_on DESC, g.id"
        );

        let rows = fetch_scoped(&self.pool, &sql, binds)
            .await
            .context("failed to fetch grades")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(GradeRecord {
                student_id: row.try_get("student_id")?,
                subject_id: row.try_get("subject_id")?,
                subject_name: row.try_get("subject_name")?,
                grade: row.try_get("grade")?,
                date: row.try_get("recorded_on")?,
            });
        }

        Ok(records)
    }
}

pub async fn fetch_school_name(pool: &PgPool, school_id: Uuid) -> anyhow::Result<Option<String>> {
    let name = sqlx::query("SELECT name FROM sentinelle.schools WHERE id = $1")
        .bind(school_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch school")?
        .map(|row| row.try_get("name"))
        .transpose()?;

    Ok(name)
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub const SEED_SCHOOL_ID: &str = "6b1f7c2e-3a51-4d0e-9a8e-0f5c2d7b9e11";

const SEED_STUDENTS: [(&str, &str, &str); 3] = [
    ("8e2a41c7-0f3d-4b6e-a915-5c7d2e90b341", "Aïcha Traoré", "MAT-2026-001"),
    ("f17b9d05-6c28-4e3a-b7d4-92a0e61c58af", "Moussa Keïta", "MAT-2026-002"),
    ("2c95e6b8-d413-47f0-8a62-b1e07f3d9c24", "Khady Ndiaye", "MAT-2026-003"),
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<Uuid> {
    let school_id = Uuid::parse_str(SEED_SCHOOL_ID)?;
    let class_id = Uuid::parse_str("a4c3d2e1-5b6f-4a7c-8d9e-1f2a3b4c5d6e")?;

    sqlx::query(
        r#"
        INSERT INTO sentinelle.schools (id, name)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(school_id)
    .bind("Collège Les Manguiers")
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO sentinelle.classes (id, school_id, name, level)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, level = EXCLUDED.level
        "#,
    )
    .bind(class_id)
    .bind(school_id)
    .bind("3e B")
    .bind("3e")
    .execute(pool)
    .await?;

    for (id, name, matricule) in SEED_STUDENTS {
        let id = Uuid::parse_str(id)?;
        sqlx::query(
            r#"
            INSERT INTO sentinelle.students (id, school_id, class_id, full_name, matricule)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (matricule) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_id = EXCLUDED.class_id
            "#,
        )
        .bind(id)
        .bind(school_id)
        .bind(class_id)
        .bind(name)
        .bind(matricule)
        .execute(pool)
        .await?;
    }

    let today = Utc::now().date_naive();

    // Aïcha: four recent absences. Moussa: two. Khady: one, plus a slump in maths.
    let attendance = vec![
        ("seed-att-001", "MAT-2026-001", "absent", 2),
        ("seed-att-002", "MAT-2026-001", "absent_8h_10h", 5),
        ("seed-att-003", "MAT-2026-001", "absent", 9),
        ("seed-att-004", "MAT-2026-001", "absent_10h_12h", 16),
        ("seed-att-005", "MAT-2026-001", "absent", 45),
        ("seed-att-006", "MAT-2026-002", "absent", 3),
        ("seed-att-007", "MAT-2026-002", "late", 4),
        ("seed-att-008", "MAT-2026-002", "absent_12h_14h", 11),
        ("seed-att-009", "MAT-2026-003", "absent", 20),
        ("seed-att-010", "MAT-2026-003", "present", 1),
    ];

    for (source_key, matricule, status, days_ago) in attendance {
        insert_attendance(
            pool,
            matricule,
            today - Duration::days(days_ago),
            status,
            source_key,
        )
        .await?;
    }

    let grades = vec![
        ("seed-grd-001", "MAT-2026-003", "Mathématiques", 8.0, 3),
        ("seed-grd-002", "MAT-2026-003", "Mathématiques", 7.5, 17),
        ("seed-grd-003", "MAT-2026-003", "Mathématiques", 14.0, 31),
        ("seed-grd-004", "MAT-2026-003", "Français", 12.0, 6),
        ("seed-grd-005", "MAT-2026-002", "Mathématiques", 11.0, 3),
        ("seed-grd-006", "MAT-2026-002", "Mathématiques", 9.0, 17),
        ("seed-grd-007", "MAT-2026-001", "Physique-Chimie", 13.5, 8),
    ];

    for (source_key, matricule, subject, grade, days_ago) in grades {
        insert_grade(
            pool,
            matricule,
            subject,
            grade,
            today - Duration::days(days_ago),
            source_key,
        )
        .await?;
    }

    Ok(school_id)
}

async fn student_by_matricule(pool: &PgPool, matricule: &str) -> anyhow::Result<(Uuid, Uuid)> {
    let row = sqlx::query("SELECT id, school_id FROM sentinelle.students WHERE matricule = $1")
        .bind(matricule)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no student with matricule {matricule}"))?;

    Ok((row.try_get("id")?, row.try_get("school_id")?))
}

async fn insert_attendance(
    pool: &PgPool,
    matricule: &str,
    day: NaiveDate,
    status: &str,
    source_key: &str,
) -> anyhow::Result<bool> {
    let status = AttendanceStatus::parse(status)
        .with_context(|| format!("unknown attendance status {status:?}"))?;
    let (student_id, _) = student_by_matricule(pool, matricule).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO sentinelle.attendance (id, student_id, day, status, source_key)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(day)
    .bind(status.as_str())
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn insert_grade(
    pool: &PgPool,
    matricule: &str,
    subject: &str,
    grade: f64,
    recorded_on: NaiveDate,
    source_key: &str,
) -> anyhow::Result<bool> {
    let (student_id, school_id) = student_by_matricule(pool, matricule).await?;

    let subject_id: Uuid = sqlx::query(
        r#"
        INSERT INTO sentinelle.subjects (id, school_id, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (school_id, name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(school_id)
    .bind(subject)
    .fetch_one(pool)
    .await?
    .try_get("id")?;

    let result = sqlx::query(
        r#"
        INSERT INTO sentinelle.grades (id, student_id, subject_id, grade, recorded_on, source_key)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(subject_id)
    .bind(grade)
    .bind(recorded_on)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, serde::Deserialize)]
struct AttendanceCsvRow {
    matricule: String,
    date: NaiveDate,
    status: String,
    source_key: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct GradeCsvRow {
    matricule: String,
    subject: String,
    grade: f64,
    date: NaiveDate,
    source_key: Option<String>,
}

pub async fn import_attendance_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<AttendanceCsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid attendance row {}", line + 1))?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let added = insert_attendance(pool, &row.matricule, row.date, &row.status, &source_key)
            .await
            .with_context(|| format!("attendance row {} not imported", line + 1))?;
        if added {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_grades_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<GradeCsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid grade row {}", line + 1))?;
        if !(0.0..=crate::risk::GRADE_SCALE_MAX).contains(&row.grade) {
            anyhow::bail!(
                "grade row {}: {} is outside the 0-20 scale",
                line + 1,
                row.grade
            );
        }
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let added = insert_grade(
            pool,
            &row.matricule,
            &row.subject,
            row.grade,
            row.date,
            &source_key,
        )
        .await
        .with_context(|| format!("grade row {} not imported", line + 1))?;
        if added {
            inserted += 1;
        }
    }

    Ok(inserted)
}
