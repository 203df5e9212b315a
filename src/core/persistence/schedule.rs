use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::types::ScheduleRecord;
use super::{Database, from_sql_time, to_sql_time};

const SELECT_SCHEDULE: &str = "SELECT schedule_id, owner_id, trigger_kind, trigger_expr, enabled, last_run, next_run,
        consecutive_failures, history_json, criteria_json
     FROM schedules";

type RawSchedule = (
    String,
    String,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
    u32,
    String,
    String,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawSchedule> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn into_record(raw: RawSchedule) -> Result<ScheduleRecord> {
    let (id, owner, kind, expr, enabled, last_run, next_run, failures, history, criteria) = raw;
    Ok(ScheduleRecord {
        schedule_id: id,
        owner_id: owner,
        trigger_kind: kind,
        trigger_expr: expr,
        enabled,
        last_run: from_sql_time(last_run),
        next_run: from_sql_time(next_run),
        consecutive_failures: failures,
        history: serde_json::from_str(&history)?,
        criteria: serde_json::from_str(&criteria)?,
    })
}

impl Database {
    pub async fn upsert_schedule(&self, record: &ScheduleRecord) -> Result<()> {
        let history = serde_json::to_string(&record.history)?;
        let criteria = serde_json::to_string(&record.criteria)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO schedules (schedule_id, owner_id, trigger_kind, trigger_expr, enabled, last_run,
                next_run, consecutive_failures, history_json, criteria_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(schedule_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                trigger_kind = excluded.trigger_kind,
                trigger_expr = excluded.trigger_expr,
                enabled = excluded.enabled,
                last_run = excluded.last_run,
                next_run = excluded.next_run,
                consecutive_failures = excluded.consecutive_failures,
                history_json = excluded.history_json,
                criteria_json = excluded.criteria_json",
            params![
                record.schedule_id,
                record.owner_id,
                record.trigger_kind,
                record.trigger_expr,
                record.enabled,
                record.last_run.as_ref().map(to_sql_time),
                record.next_run.as_ref().map(to_sql_time),
                record.consecutive_failures,
                history,
                criteria,
            ],
        )?;
        Ok(())
    }

    /// Overwrite an existing row; returns `false` when the row is gone.
    pub async fn update_schedule(&self, record: &ScheduleRecord) -> Result<bool> {
        let history = serde_json::to_string(&record.history)?;
        let criteria = serde_json::to_string(&record.criteria)?;
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE schedules SET
                enabled = ?2,
                last_run = ?3,
                next_run = ?4,
                consecutive_failures = ?5,
                history_json = ?6,
                criteria_json = ?7
             WHERE schedule_id = ?1",
            params![
                record.schedule_id,
                record.enabled,
                record.last_run.as_ref().map(to_sql_time),
                record.next_run.as_ref().map(to_sql_time),
                record.consecutive_failures,
                history,
                criteria,
            ],
        )?;
        Ok(rows > 0)
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> Result<Option<ScheduleRecord>> {
        let raw = {
            let db = self.db.lock().await;
            db.query_row(
                &format!("{} WHERE schedule_id = ?1", SELECT_SCHEDULE),
                params![schedule_id],
                read_row,
            )
            .optional()?
        };
        raw.map(into_record).transpose()
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleRecord>> {
        let raws = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(&format!("{} ORDER BY created_at, schedule_id", SELECT_SCHEDULE))?;
            let rows = stmt.query_map([], read_row)?;
            let raws = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            raws
        };
        raws.into_iter().map(into_record).collect()
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM schedules WHERE schedule_id = ?1",
            params![schedule_id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persistence::types::RunRecord;
    use crate::core::workflow::types::{WorkflowCriteria, WorkflowStatus};
    use chrono::Utc;

    fn record(id: &str) -> ScheduleRecord {
        let mut criteria = WorkflowCriteria::new("owner-1");
        criteria.search.title = Some("Rust Engineer".into());
        ScheduleRecord {
            schedule_id: id.to_string(),
            owner_id: "owner-1".into(),
            trigger_kind: "cron".into(),
            trigger_expr: "0 0 9 * * *".into(),
            enabled: true,
            last_run: None,
            next_run: Some(Utc::now()),
            consecutive_failures: 0,
            history: vec![],
            criteria,
        }
    }

    #[tokio::test]
    async fn schedule_crud() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_schedule(&record("daily")).await.unwrap();
        db.upsert_schedule(&record("weekly")).await.unwrap();

        let mut updated = record("daily");
        updated.consecutive_failures = 2;
        updated.enabled = false;
        updated.history.push(RunRecord {
            workflow_id: "wf-1".into(),
            status: WorkflowStatus::Failed,
            finished_at: Utc::now(),
        });
        db.upsert_schedule(&updated).await.unwrap();

        let loaded = db.get_schedule("daily").await.unwrap().unwrap();
        assert_eq!(loaded.consecutive_failures, 2);
        assert!(!loaded.enabled);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.criteria.search.title.as_deref(), Some("Rust Engineer"));

        assert_eq!(db.list_schedules().await.unwrap().len(), 2);
        let mut fired = record("weekly");
        fired.consecutive_failures = 1;
        assert!(db.update_schedule(&fired).await.unwrap());
        assert_eq!(
            db.get_schedule("weekly").await.unwrap().unwrap().consecutive_failures,
            1
        );
        assert!(!db.update_schedule(&record("missing")).await.unwrap());
        assert!(db.get_schedule("missing").await.unwrap().is_none());

        assert!(db.delete_schedule("daily").await.unwrap());
        assert!(!db.delete_schedule("daily").await.unwrap());
        assert!(db.get_schedule("daily").await.unwrap().is_none());
    }
}
