use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use super::types::{ApplicationRecord, ApplicationStatus, OwnerProfile, OwnerRecord};
use super::{Database, from_sql_time, to_sql_time};

/// Owner-facing persistent storage: read at discovery, written at submit.
#[async_trait]
pub trait OwnerRecords: Send + Sync {
    async fn load(&self, owner_id: &str) -> Result<OwnerRecord>;

    async fn save(&self, application: &ApplicationRecord) -> Result<()>;
}

impl Database {
    pub async fn upsert_profile(&self, profile: &OwnerProfile) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO owner_profiles (owner_id, display_name, email, phone, resume, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
             ON CONFLICT(owner_id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                phone = excluded.phone,
                resume = excluded.resume,
                updated_at = CURRENT_TIMESTAMP",
            params![
                profile.owner_id,
                profile.display_name,
                profile.email,
                profile.phone,
                profile.resume,
            ],
        )?;
        Ok(())
    }

    pub async fn get_profile(&self, owner_id: &str) -> Result<Option<OwnerProfile>> {
        let db = self.db.lock().await;
        let profile = db
            .query_row(
                "SELECT owner_id, display_name, email, phone, resume FROM owner_profiles WHERE owner_id = ?1",
                params![owner_id],
                |row| {
                    Ok(OwnerProfile {
                        owner_id: row.get(0)?,
                        display_name: row.get(1)?,
                        email: row.get(2)?,
                        phone: row.get(3)?,
                        resume: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    pub async fn record_application(&self, application: &ApplicationRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO applications (owner_id, workflow_id, candidate_id, job_url, company, title, status, serviced_by, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                application.owner_id,
                application.workflow_id,
                application.candidate_id,
                application.job_url,
                application.company,
                application.title,
                application.status.as_str(),
                application.serviced_by,
                to_sql_time(&application.applied_at),
            ],
        )?;
        Ok(())
    }

    pub async fn list_applications(&self, owner_id: &str) -> Result<Vec<ApplicationRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT owner_id, workflow_id, candidate_id, job_url, company, title, status, serviced_by, applied_at
             FROM applications WHERE owner_id = ?1 ORDER BY applied_at, id",
        )?;
        let rows = stmt.query_map(params![owner_id], |row| {
            let status: String = row.get(6)?;
            let applied_at: String = row.get(8)?;
            Ok(ApplicationRecord {
                owner_id: row.get(0)?,
                workflow_id: row.get(1)?,
                candidate_id: row.get(2)?,
                job_url: row.get(3)?,
                company: row.get(4)?,
                title: row.get(5)?,
                status: ApplicationStatus::from_status(&status),
                serviced_by: row.get(7)?,
                applied_at: from_sql_time(Some(applied_at)).unwrap_or_default(),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[async_trait]
impl OwnerRecords for Database {
    async fn load(&self, owner_id: &str) -> Result<OwnerRecord> {
        let profile = self.get_profile(owner_id).await?.unwrap_or_else(|| OwnerProfile {
            owner_id: owner_id.to_string(),
            ..OwnerProfile::default()
        });
        let applications = self.list_applications(owner_id).await?;
        Ok(OwnerRecord {
            profile,
            applications,
        })
    }

    async fn save(&self, application: &ApplicationRecord) -> Result<()> {
        self.record_application(application).await
    }
}
