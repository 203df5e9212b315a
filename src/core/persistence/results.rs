use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use super::{Database, to_sql_time};
use crate::core::store::ResultArchive;
use crate::core::workflow::types::WorkflowResult;

impl Database {
    pub async fn archive_result(&self, result: &WorkflowResult) -> Result<()> {
        let json = serde_json::to_string(result)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO workflow_results (workflow_id, owner_id, status, started_at, finished_at, result_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.workflow_id,
                result.owner_id,
                result.status.as_str(),
                to_sql_time(&result.started_at),
                result.finished_at.as_ref().map(to_sql_time),
                json,
            ],
        )?;
        Ok(())
    }

    pub async fn get_result(&self, workflow_id: &str) -> Result<Option<WorkflowResult>> {
        let json: Option<String> = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT result_json FROM workflow_results WHERE workflow_id = ?1",
                params![workflow_id],
                |row| row.get(0),
            )
            .optional()?
        };
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Most recent first.
    pub async fn list_results_for_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowResult>> {
        let rows: Vec<String> = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(
                "SELECT result_json FROM workflow_results WHERE owner_id = ?1
                 ORDER BY started_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![owner_id, limit as i64], |row| row.get(0))?;
            let out = rows.collect::<rusqlite::Result<Vec<String>>>()?;
            out
        };
        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl ResultArchive for Database {
    async fn archive(&self, result: &WorkflowResult) -> Result<()> {
        self.archive_result(result).await
    }
}
