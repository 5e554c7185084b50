use std::collections::HashMap;

use tokio::sync::RwLock;

use leadflow_core::domain::lead::{ContactId, LeadRecord};

use super::{
    ConversationLogRepository, CrmSyncLogEntry, LeadListFilter, LeadRepository, RepositoryError,
    TransitionLogEntry, TurnLogEntry,
};

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, LeadRecord>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find_by_contact(
        &self,
        contact_id: &ContactId,
    ) -> Result<Option<LeadRecord>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(contact_id.as_str()).cloned())
    }

    async fn save(&self, record: &LeadRecord) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        leads.insert(record.contact_id.0.clone(), record.clone());
        Ok(())
    }

    async fn list(&self, filter: &LeadListFilter) -> Result<Vec<LeadRecord>, RepositoryError> {
        let leads = self.leads.read().await;
        let mut matching: Vec<LeadRecord> =
            leads.values().filter(|record| filter.matches(record)).cloned().collect();
        matching.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        matching.truncate(filter.limit() as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryConversationLogRepository {
    turns: RwLock<Vec<TurnLogEntry>>,
    transitions: RwLock<Vec<TransitionLogEntry>>,
    crm_syncs: RwLock<Vec<CrmSyncLogEntry>>,
}

#[async_trait::async_trait]
impl ConversationLogRepository for InMemoryConversationLogRepository {
    async fn append_turn(&self, entry: TurnLogEntry) -> Result<(), RepositoryError> {
        self.turns.write().await.push(entry);
        Ok(())
    }

    async fn append_transition(&self, entry: TransitionLogEntry) -> Result<(), RepositoryError> {
        self.transitions.write().await.push(entry);
        Ok(())
    }

    async fn append_crm_sync(&self, entry: CrmSyncLogEntry) -> Result<(), RepositoryError> {
        self.crm_syncs.write().await.push(entry);
        Ok(())
    }

    async fn list_turns(&self, contact_id: &ContactId) -> Result<Vec<TurnLogEntry>, RepositoryError> {
        let turns = self.turns.read().await;
        Ok(turns.iter().filter(|entry| &entry.contact_id == contact_id).cloned().collect())
    }

    async fn list_transitions(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError> {
        let transitions = self.transitions.read().await;
        Ok(transitions.iter().filter(|entry| &entry.contact_id == contact_id).cloned().collect())
    }

    async fn list_crm_syncs(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<CrmSyncLogEntry>, RepositoryError> {
        let crm_syncs = self.crm_syncs.read().await;
        Ok(crm_syncs.iter().filter(|entry| &entry.contact_id == contact_id).cloned().collect())
    }
}
