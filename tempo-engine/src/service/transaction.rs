//! Transaction Service
//!
//! Read-only view over the execution history of recurring jobs.

use std::sync::Arc;
use tempo_core::domain::transaction::Transaction;
use uuid::Uuid;

use super::{ServiceError, parse_status_filter};
use crate::repository::Storage;

pub struct TransactionService {
    storage: Arc<dyn Storage>,
}

impl TransactionService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Lists transactions oldest first, optionally filtered by status name
    pub async fn list(&self, status_filter: Option<&str>) -> Result<Vec<Transaction>, ServiceError> {
        let status = parse_status_filter(status_filter)?;
        Ok(self.storage.get_transactions(status).await?)
    }

    pub async fn by_job(&self, job_id: Uuid) -> Result<Vec<Transaction>, ServiceError> {
        Ok(self.storage.get_transactions_by_job(job_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStorage;
    use chrono::Utc;
    use tempo_core::domain::job::{Job, TaskParams};

    #[tokio::test]
    async fn test_list_and_by_job() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = TransactionService::new(storage.clone());

        let mut first = Job::new("a", "noop", TaskParams::new());
        first.mark_started(Utc::now());
        first.mark_completed(Utc::now());
        let mut second = Job::new("b", "fail", TaskParams::new());
        second.mark_started(Utc::now());
        second.mark_failed(Utc::now(), "boom");

        for job in [&first, &first, &second] {
            storage
                .create_transaction(&Transaction::from_job(job))
                .await
                .unwrap();
        }

        assert_eq!(service.list(None).await.unwrap().len(), 3);
        let failed = service.list(Some("failed")).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, second.id);

        assert_eq!(service.by_job(first.id).await.unwrap().len(), 2);
        assert!(service.by_job(Uuid::new_v4()).await.unwrap().is_empty());
        assert!(service.list(Some("nope")).await.is_err());
    }
}
