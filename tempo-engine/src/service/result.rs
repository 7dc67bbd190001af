//! Result Service

use std::sync::Arc;
use tempo_core::domain::job::JobResult;
use tracing::info;
use uuid::Uuid;

use super::ServiceError;
use crate::repository::Storage;

/// Read and delete access to the latest result of each job
pub struct ResultService {
    storage: Arc<dyn Storage>,
}

impl ResultService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, job_id: Uuid) -> Result<JobResult, ServiceError> {
        Ok(self.storage.get_job_result(job_id).await?)
    }

    pub async fn delete(&self, job_id: Uuid) -> Result<(), ServiceError> {
        self.storage.delete_job_result(job_id).await?;
        info!(job_id = %job_id, "Job result deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_and_delete() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = ResultService::new(storage.clone());
        let job_id = Uuid::new_v4();

        assert!(service.get(job_id).await.unwrap_err().is_not_found());

        storage
            .create_job_result(&JobResult::success(job_id, Some(json!({"slept_ms": 10}))))
            .await
            .unwrap();
        let result = service.get(job_id).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.metadata, Some(json!({"slept_ms": 10})));

        service.delete(job_id).await.unwrap();
        assert!(service.delete(job_id).await.unwrap_err().is_not_found());
    }
}
