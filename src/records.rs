//! Document and analysis-job records.
//!
//! `documents` rows are written once when an upload is stored.
//! `analysis_jobs` rows track a job through the workflow stages; each row is
//! only ever updated by the worker that owns its job id.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{AnalysisJob, Document, WorkflowStage};

/// Columns written when a stage transition is recorded.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate<'a> {
    pub results_key: Option<&'a str>,
    pub groups_key: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Access to the document and job tables.
#[derive(Debug, Clone)]
pub struct JobRecords {
    pool: SqlitePool,
}

impl JobRecords {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_document(&self, doc: &Document) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO documents (id, filename, storage_key, uploaded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.storage_key)
        .bind(doc.uploaded_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, filename, storage_key, uploaded_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Document, sqlx::Error> {
            Ok(Document {
                id: row.try_get("id")?,
                filename: row.try_get("filename")?,
                storage_key: row.try_get("storage_key")?,
                uploaded_at: timestamp(row.try_get("uploaded_at")?),
            })
        })
        .transpose()
    }

    pub async fn insert_job(&self, job: &AnalysisJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO analysis_jobs (job_id, document_id, document_key, stage, created_at, updated_at, results_key, groups_key, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.document_id)
        .bind(&job.document_key)
        .bind(job.stage.as_str())
        .bind(job.created_at.timestamp())
        .bind(job.updated_at.timestamp())
        .bind(&job.results_key)
        .bind(&job.groups_key)
        .bind(&job.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move `job_id` to `stage`. Keys and detail already recorded are kept
    /// unless `update` supplies new values. Returns `false` for unknown jobs.
    pub async fn set_stage(
        &self,
        job_id: &str,
        stage: WorkflowStage,
        update: StageUpdate<'_>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs SET
                stage = ?,
                updated_at = ?,
                results_key = COALESCE(?, results_key),
                groups_key = COALESCE(?, groups_key),
                detail = COALESCE(?, detail)
            WHERE job_id = ?
            "#,
        )
        .bind(stage.as_str())
        .bind(Utc::now().timestamp())
        .bind(update.results_key)
        .bind(update.groups_key)
        .bind(update.detail)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT job_id, document_id, document_key, stage, created_at, updated_at, results_key, groups_key, detail FROM analysis_jobs WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Jobs whose workflow has not reached a final stage, or whose
    /// monitoring was cancelled, oldest first.
    pub async fn unfinished_jobs(&self) -> Result<Vec<AnalysisJob>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT job_id, document_id, document_key, stage, created_at, updated_at, results_key, groups_key, detail FROM analysis_jobs ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows
            .iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs
            .into_iter()
            .filter(|j| !j.stage.is_final() || j.stage == WorkflowStage::Cancelled)
            .collect())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<AnalysisJob, sqlx::Error> {
    let stage: String = row.try_get("stage")?;
    let stage = stage
        .parse::<WorkflowStage>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(AnalysisJob {
        job_id: row.try_get("job_id")?,
        document_id: row.try_get("document_id")?,
        document_key: row.try_get("document_key")?,
        stage,
        created_at: timestamp(row.try_get("created_at")?),
        updated_at: timestamp(row.try_get("updated_at")?),
        results_key: row.try_get("results_key")?,
        groups_key: row.try_get("groups_key")?,
        detail: row.try_get("detail")?,
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn records() -> JobRecords {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        JobRecords::new(pool)
    }

    fn sample_job() -> (Document, AnalysisJob) {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let doc = Document {
            id: "doc-1".to_string(),
            filename: "report.pdf".to_string(),
            storage_key: "uploads/doc-1/report.pdf".to_string(),
            uploaded_at: now,
        };
        let job = AnalysisJob {
            job_id: "job-1".to_string(),
            document_id: doc.id.clone(),
            document_key: doc.storage_key.clone(),
            stage: WorkflowStage::AnalysisStarted,
            created_at: now,
            updated_at: now,
            results_key: None,
            groups_key: None,
            detail: None,
        };
        (doc, job)
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let records = records().await;
        let (doc, job) = sample_job();
        records.insert_document(&doc).await.unwrap();
        records.insert_job(&job).await.unwrap();

        assert_eq!(records.get_document("doc-1").await.unwrap(), Some(doc));
        assert_eq!(records.get_job("job-1").await.unwrap(), Some(job));
        assert_eq!(records.get_job("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_stage_keeps_existing_keys() {
        let records = records().await;
        let (doc, job) = sample_job();
        records.insert_document(&doc).await.unwrap();
        records.insert_job(&job).await.unwrap();

        let updated = records
            .set_stage(
                "job-1",
                WorkflowStage::ResultsFetched,
                StageUpdate {
                    results_key: Some("uploads/doc-1/report_results.json"),
                    ..StageUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(updated);

        records
            .set_stage("job-1", WorkflowStage::ResultsPersisted, StageUpdate::default())
            .await
            .unwrap();

        let stored = records.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(stored.stage, WorkflowStage::ResultsPersisted);
        assert_eq!(
            stored.results_key.as_deref(),
            Some("uploads/doc-1/report_results.json")
        );
        assert!(records.unfinished_jobs().await.unwrap().is_empty());

        assert!(!records
            .set_stage("nope", WorkflowStage::Errored, StageUpdate::default())
            .await
            .unwrap());
    }
}
