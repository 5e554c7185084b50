use sqlx::Row;

use leadflow_core::domain::lead::{ContactId, LeadRecord};

use super::{LeadListFilter, LeadRepository, RepositoryError};
use crate::DbPool;

/// Stores the full record as JSON; the scalar columns exist for filtering.
pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<LeadRecord, RepositoryError> {
    let record_json: String =
        row.try_get("record_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    serde_json::from_str(&record_json).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_contact(
        &self,
        contact_id: &ContactId,
    ) -> Result<Option<LeadRecord>, RepositoryError> {
        let row = sqlx::query("SELECT record_json FROM lead WHERE contact_id = ?")
            .bind(contact_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_record(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &LeadRecord) -> Result<(), RepositoryError> {
        let record_json =
            serde_json::to_string(record).map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO lead (contact_id, channel, state, checkpoint, score, crm_id,
                               synced_to_crm, record_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(contact_id) DO UPDATE SET
                 state = excluded.state,
                 checkpoint = excluded.checkpoint,
                 score = excluded.score,
                 crm_id = excluded.crm_id,
                 synced_to_crm = excluded.synced_to_crm,
                 record_json = excluded.record_json,
                 updated_at = excluded.updated_at",
        )
        .bind(record.contact_id.as_str())
        .bind(record.channel().as_str())
        .bind(record.state().as_str())
        .bind(i64::from(record.checkpoint()))
        .bind(record.score.map(|score| score.as_str()))
        .bind(record.crm_id.as_deref())
        .bind(record.synced_to_crm)
        .bind(&record_json)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, filter: &LeadListFilter) -> Result<Vec<LeadRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT record_json FROM lead
             WHERE (? IS NULL OR state = ?)
               AND (? IS NULL OR score = ?)
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.score.map(|score| score.as_str()))
        .bind(filter.score.map(|score| score.as_str()))
        .bind(filter.limit())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::lead::{Channel, ContactId, LeadRecord, LeadScore};
    use leadflow_core::flows::{LeadState, TransitionOutcome};

    use super::SqlLeadRepository;
    use crate::repositories::{LeadListFilter, LeadRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlLeadRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlLeadRepository::new(pool)
    }

    fn collecting_lead(contact: &str) -> LeadRecord {
        let mut record = LeadRecord::new(ContactId(contact.to_owned()), Channel::Instagram);
        record.data.implement_of_interest = Some("horquilla".to_owned());
        record
            .commit(&TransitionOutcome::moved(
                LeadState::New,
                LeadState::CollectingTechData,
                None,
                Vec::new(),
            ))
            .expect("commit transition");
        record
    }

    #[tokio::test]
    async fn save_and_find_preserves_record() {
        let repo = setup().await;
        let record = collecting_lead("ig-100");

        repo.save(&record).await.expect("save");
        let found = repo.find_by_contact(&record.contact_id).await.expect("find");

        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn save_twice_updates_in_place() {
        let repo = setup().await;
        let mut record = collecting_lead("ig-101");
        repo.save(&record).await.expect("first save");

        record.score = Some(LeadScore::C);
        record.crm_id = Some("pilot-7".to_owned());
        repo.save(&record).await.expect("second save");

        let found = repo.find_by_contact(&record.contact_id).await.expect("find").expect("exists");
        assert_eq!(found.score, Some(LeadScore::C));
        assert_eq!(found.crm_id.as_deref(), Some("pilot-7"));
        assert_eq!(repo.list(&LeadListFilter::default()).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_state_and_score() {
        let repo = setup().await;
        let mut scored = collecting_lead("ig-1");
        scored.score = Some(LeadScore::C);
        repo.save(&scored).await.expect("save scored");
        repo.save(&collecting_lead("ig-2")).await.expect("save second");
        repo.save(&LeadRecord::new(ContactId("wa-3".to_owned()), Channel::Whatsapp))
            .await
            .expect("save new");

        let collecting = repo
            .list(&LeadListFilter { state: Some(LeadState::CollectingTechData), ..Default::default() })
            .await
            .expect("list collecting");
        assert_eq!(collecting.len(), 2);

        let c_leads = repo
            .list(&LeadListFilter { score: Some(LeadScore::C), ..Default::default() })
            .await
            .expect("list scored");
        assert_eq!(c_leads.len(), 1);
        assert_eq!(c_leads[0].contact_id.as_str(), "ig-1");
    }

    #[tokio::test]
    async fn unknown_contact_is_none() {
        let repo = setup().await;
        let found = repo.find_by_contact(&ContactId("nobody".to_owned())).await.expect("find");
        assert!(found.is_none());
    }
}
