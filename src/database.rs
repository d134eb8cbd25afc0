use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::data::{self, StudentRow, INCOMPLETE, MISSING_NUMBER};
use crate::settings;

const STUDENT_COLUMNS: &str = "s.id, s.firstname, s.lastname, s.sex, s.program, s.municipality, \
     s.income, s.shs_type, s.shs_origin, s.gwa, s.honors, s.income_category, s.dataset_id";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentRecord {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub sex: String,
    pub program: String,
    pub municipality: String,
    pub income: f64,
    #[serde(rename = "SHS_type")]
    pub shs_type: String,
    #[serde(rename = "SHS_origin")]
    pub shs_origin: String,
    #[serde(rename = "GWA")]
    pub gwa: f64,
    #[serde(rename = "Honors")]
    pub honors: String,
    #[serde(rename = "IncomeCategory")]
    pub income_category: String,
    pub dataset_id: i64,
}

impl StudentRecord {
    pub fn is_complete(&self) -> bool {
        data::is_complete(
            [
                self.firstname.as_str(),
                &self.lastname,
                &self.sex,
                &self.program,
                &self.municipality,
                &self.shs_type,
                &self.shs_origin,
            ],
            self.gwa,
            self.income,
        )
    }

    /// Case-insensitive substring match on first or last name; `needle` is already lower-cased.
    pub fn matches_name(&self, needle: &str) -> bool {
        self.firstname.to_lowercase().contains(needle) || self.lastname.to_lowercase().contains(needle)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname).trim().to_string()
    }

    /// Recompute the system-owned columns after an edit.
    pub fn refresh_derived(&mut self) {
        let gwa = Some(self.gwa).filter(|g| *g > 0.0);
        let income = Some(self.income).filter(|i| *i >= 0.0);
        self.honors = data::classify_honors(gwa).to_string();
        self.income_category = data::classify_income(income).to_string();
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ClusteredStudent {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub student: StudentRecord,
    pub cluster_number: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    pub profile: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DatasetSummary {
    pub id: i64,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub uploaded_by_email: Option<String>,
    pub student_count: i64,
    pub cluster_count: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ClusterRun {
    pub id: i64,
    pub dataset_id: i64,
    pub k: Option<i64>,
    pub centroids: String,
}

impl ClusterRun {
    pub fn centroids(&self) -> Vec<Vec<f64>> {
        serde_json::from_str(&self.centroids).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub action: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentFilter {
    pub program: Option<String>,
    pub sex: Option<String>,
    pub municipality: Option<String>,
    pub income_category: Option<String>,
    pub shs_type: Option<String>,
    pub shs_origin: Option<String>,
    pub honors: Option<String>,
    pub search: Option<String>,
}

/// A parsed upload ready to be stored. `labels[i]` is the cluster of `rows[i]`,
/// `None` for rows left out of clustering.
pub struct NewDataset<'a> {
    pub filename: &'a str,
    pub uploaded_by: i64,
    pub rows: &'a [StudentRow],
    pub k: Option<usize>,
    pub centroids: &'a [Vec<f64>],
    pub labels: &'a [Option<usize>],
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &settings::Database) -> Result<Self, sqlx::Error> {
        // Every in-memory connection is its own database, so those get exactly one.
        let max_connections = if config.is_in_memory() {
            1
        } else {
            config.max_connections.max(1)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.url)
            .await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                profile TEXT,
                created_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                created_at DATETIME NOT NULL,
                expires_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                uploaded_by INTEGER NOT NULL,
                upload_date DATETIME NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id INTEGER NOT NULL,
                k INTEGER,
                centroids TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                firstname TEXT NOT NULL,
                lastname TEXT NOT NULL,
                sex TEXT NOT NULL,
                program TEXT NOT NULL,
                municipality TEXT NOT NULL,
                income REAL NOT NULL,
                shs_type TEXT NOT NULL,
                shs_origin TEXT NOT NULL,
                gwa REAL NOT NULL,
                honors TEXT NOT NULL,
                income_category TEXT NOT NULL,
                dataset_id INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS student_cluster (
                student_id INTEGER NOT NULL,
                cluster_id INTEGER NOT NULL,
                cluster_number INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS activity_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                details TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_students_dataset ON students (dataset_id)",
            "CREATE INDEX IF NOT EXISTS idx_student_cluster_cluster ON student_cluster (cluster_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ---- users ----

    pub async fn count_users(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        role: &str,
        profile: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash, role, active, profile, created_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .bind(profile)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn update_user(&self, id: i64, role: &str, profile: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET role = ?, profile = ? WHERE id = ?")
            .bind(role)
            .bind(profile)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_profile(&self, id: i64, profile: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET profile = ? WHERE id = ?")
            .bind(profile)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_password(&self, id: i64, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if !active {
            self.delete_sessions_for(id).await?;
        }
        Ok(())
    }

    pub async fn delete_user(&self, id: i64) -> Result<(), sqlx::Error> {
        self.delete_sessions_for(id).await?;
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- sessions ----

    pub async fn create_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(user_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The active user owning an unexpired session token.
    pub async fn session_user(&self, token: &str) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.* FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = ? AND s.expires_at > ? AND u.active = 1
            "#,
        )
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_session(&self, token: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_sessions_for(&self, user_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- activity logs ----

    pub async fn log_activity(
        &self,
        user_id: i64,
        action: &str,
        details: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO activity_logs (user_id, action, details, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(action)
        .bind(details)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_activity(&self) -> Result<Vec<ActivityLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, ActivityLogEntry>(
            r#"
            SELECT a.id, a.action, a.details, a.created_at, u.email AS user_email
            FROM activity_logs a
            LEFT JOIN users u ON a.user_id = u.id
            ORDER BY a.created_at DESC, a.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn activity_for_user(&self, user_id: i64) -> Result<Vec<ActivityLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, ActivityLogEntry>(
            r#"
            SELECT id, action, details, created_at, NULL AS user_email
            FROM activity_logs
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    // ---- datasets ----

    /// Store an upload as the only active dataset, with its cluster run and assignments.
    pub async fn insert_dataset(&self, upload: NewDataset<'_>) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE datasets SET is_active = 0")
            .execute(&mut *tx)
            .await?;

        let dataset_id = sqlx::query(
            "INSERT INTO datasets (filename, uploaded_by, upload_date, is_active) VALUES (?, ?, ?, 1)",
        )
        .bind(upload.filename)
        .bind(upload.uploaded_by)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let centroids = serde_json::to_string(upload.centroids).unwrap_or_else(|_| "[]".into());
        let cluster_id = sqlx::query("INSERT INTO clusters (dataset_id, k, centroids) VALUES (?, ?, ?)")
            .bind(dataset_id)
            .bind(upload.k.map(|k| k as i64))
            .bind(centroids)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for (idx, row) in upload.rows.iter().enumerate() {
            let text = |value: &Option<String>| value.clone().unwrap_or_else(|| INCOMPLETE.to_string());

            let student_id = sqlx::query(
                r#"
                INSERT INTO students (firstname, lastname, sex, program, municipality, income,
                                      shs_type, shs_origin, gwa, honors, income_category, dataset_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(text(&row.firstname))
            .bind(text(&row.lastname))
            .bind(text(&row.sex))
            .bind(text(&row.program))
            .bind(text(&row.municipality))
            .bind(row.income.unwrap_or(MISSING_NUMBER))
            .bind(text(&row.shs_type))
            .bind(text(&row.shs_origin))
            .bind(row.gwa.unwrap_or(MISSING_NUMBER))
            .bind(row.honors())
            .bind(row.income_category())
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            if let Some(Some(label)) = upload.labels.get(idx) {
                sqlx::query(
                    "INSERT INTO student_cluster (student_id, cluster_id, cluster_number) VALUES (?, ?, ?)",
                )
                .bind(student_id)
                .bind(cluster_id)
                .bind(*label as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(dataset_id)
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetSummary>, sqlx::Error> {
        sqlx::query_as::<_, DatasetSummary>(
            r#"
            SELECT d.id,
                   d.filename,
                   d.upload_date,
                   u.email AS uploaded_by_email,
                   (SELECT COUNT(*) FROM students s WHERE s.dataset_id = d.id) AS student_count,
                   (SELECT MAX(c.k) FROM clusters c WHERE c.dataset_id = d.id) AS cluster_count,
                   d.is_active
            FROM datasets d
            LEFT JOIN users u ON d.uploaded_by = u.id
            ORDER BY d.upload_date DESC, d.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn dataset_filename(&self, id: i64) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT filename FROM datasets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The active dataset, or the most recently uploaded one when none is active.
    pub async fn current_dataset_id(&self) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM datasets ORDER BY is_active DESC, upload_date DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn activate_dataset(&self, id: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE datasets SET is_active = 0")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE datasets SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    pub async fn delete_dataset(&self, id: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM student_cluster WHERE student_id IN (SELECT id FROM students WHERE dataset_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        for statement in [
            "DELETE FROM students WHERE dataset_id = ?",
            "DELETE FROM clusters WHERE dataset_id = ?",
            "DELETE FROM datasets WHERE id = ?",
        ] {
            sqlx::query(statement).bind(id).execute(&mut *tx).await?;
        }
        tx.commit().await
    }

    // ---- students ----

    pub async fn students_for_dataset(
        &self,
        dataset_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<StudentRecord>, sqlx::Error> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {STUDENT_COLUMNS} FROM students s WHERE s.dataset_id = "
        ));
        query.push_bind(dataset_id).push(" ORDER BY s.id");
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        query
            .build_query_as::<StudentRecord>()
            .fetch_all(&self.pool)
            .await
    }

    pub async fn filter_students(
        &self,
        dataset_id: i64,
        filter: &StudentFilter,
    ) -> Result<Vec<StudentRecord>, sqlx::Error> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {STUDENT_COLUMNS} FROM students s WHERE s.dataset_id = "
        ));
        query.push_bind(dataset_id);

        let exact = [
            ("s.program", &filter.program),
            ("s.sex", &filter.sex),
            ("s.municipality", &filter.municipality),
            ("s.income_category", &filter.income_category),
            ("s.shs_type", &filter.shs_type),
            ("s.shs_origin", &filter.shs_origin),
            ("s.honors", &filter.honors),
        ];
        for (column, value) in exact {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                query
                    .push(format!(" AND {column} = "))
                    .push_bind(value.to_string());
            }
        }

        query.push(" ORDER BY s.id");
        let students = query
            .build_query_as::<StudentRecord>()
            .fetch_all(&self.pool)
            .await?;

        // SQLite's LOWER() only folds ASCII, so name search happens here.
        Ok(match filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(search) => {
                let needle = search.to_lowercase();
                students
                    .into_iter()
                    .filter(|s| s.matches_name(&needle))
                    .collect()
            }
            None => students,
        })
    }

    pub async fn find_student(&self, id: i64) -> Result<Option<StudentRecord>, sqlx::Error> {
        sqlx::query_as::<_, StudentRecord>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students s WHERE s.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn update_student(&self, student: &StudentRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE students
            SET firstname = ?, lastname = ?, sex = ?, program = ?, municipality = ?,
                shs_type = ?, shs_origin = ?, gwa = ?, income = ?, honors = ?, income_category = ?
            WHERE id = ?
            "#,
        )
        .bind(&student.firstname)
        .bind(&student.lastname)
        .bind(&student.sex)
        .bind(&student.program)
        .bind(&student.municipality)
        .bind(&student.shs_type)
        .bind(&student.shs_origin)
        .bind(student.gwa)
        .bind(student.income)
        .bind(&student.honors)
        .bind(&student.income_category)
        .bind(student.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- cluster runs ----

    pub async fn latest_cluster_run(&self, dataset_id: i64) -> Result<Option<ClusterRun>, sqlx::Error> {
        sqlx::query_as::<_, ClusterRun>(
            "SELECT id, dataset_id, k, centroids FROM clusters WHERE dataset_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Students of a dataset with their cluster in the given run (if any).
    pub async fn clustered_students(
        &self,
        dataset_id: i64,
        cluster_id: Option<i64>,
    ) -> Result<Vec<ClusteredStudent>, sqlx::Error> {
        sqlx::query_as::<_, ClusteredStudent>(&format!(
            r#"
            SELECT {STUDENT_COLUMNS}, sc.cluster_number
            FROM students s
            LEFT JOIN student_cluster sc ON s.id = sc.student_id AND sc.cluster_id = ?
            WHERE s.dataset_id = ?
            ORDER BY s.id
            "#
        ))
        .bind(cluster_id)
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Drop every cluster run of a dataset and store a fresh one.
    pub async fn replace_cluster_run(
        &self,
        dataset_id: i64,
        k: usize,
        centroids: &[Vec<f64>],
        assignments: &[(i64, usize)],
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM student_cluster WHERE cluster_id IN (SELECT id FROM clusters WHERE dataset_id = ?)",
        )
        .bind(dataset_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM clusters WHERE dataset_id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;

        let centroids = serde_json::to_string(centroids).unwrap_or_else(|_| "[]".into());
        let cluster_id = sqlx::query("INSERT INTO clusters (dataset_id, k, centroids) VALUES (?, ?, ?)")
            .bind(dataset_id)
            .bind(k as i64)
            .bind(centroids)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for (student_id, label) in assignments {
            sqlx::query(
                "INSERT INTO student_cluster (student_id, cluster_id, cluster_number) VALUES (?, ?, ?)",
            )
            .bind(student_id)
            .bind(cluster_id)
            .bind(*label as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(cluster_id)
    }
}
