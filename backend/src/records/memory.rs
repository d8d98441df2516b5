use async_trait::async_trait;
use shared::DetectionStatus;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DetectionRecord, DetectionUpdate, NewDetection, RecordStore, StoreError};

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Uuid, DetectionRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record as-is. Used to seed records created outside the upload flow.
    pub async fn insert(&self, record: DetectionRecord) {
        self.records.write().await.insert(record.id, record);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, new: NewDetection) -> Result<DetectionRecord, StoreError> {
        let record = DetectionRecord::new(new);
        log::debug!("Creating detection {} in memory", record.id);
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<DetectionRecord, StoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        id: Uuid,
        update: DetectionUpdate,
    ) -> Result<DetectionRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply(update);
        Ok(record.clone())
    }

    async fn update_if_status(
        &self,
        id: Uuid,
        expected: DetectionStatus,
        update: DetectionUpdate,
    ) -> Result<DetectionRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.status != expected {
            return Err(StoreError::Conflict {
                id,
                expected,
                actual: record.status,
            });
        }
        record.apply(update);
        Ok(record.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<DetectionRecord>, StoreError> {
        let records = self.records.read().await;
        let mut all: Vec<DetectionRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> NewDetection {
        NewDetection {
            media_path: format!("uploads/{}", name),
            media_type: "image".into(),
            file_name: name.into(),
            file_size: 10,
            description: None,
        }
    }

    #[tokio::test]
    async fn get_missing_record_is_not_found() {
        let store = InMemoryRecordStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn update_returns_the_full_record() {
        let store = InMemoryRecordStore::new();
        let created = store.create(upload("a.jpg")).await.unwrap();

        let updated = store
            .update(created.id, DetectionUpdate::processing())
            .await
            .unwrap();
        assert_eq!(updated.status, DetectionStatus::Processing);
        assert_eq!(updated.file_name, "a.jpg");
        assert_eq!(store.get(created.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn conditional_update_rejects_unexpected_status() {
        let store = InMemoryRecordStore::new();
        let created = store.create(upload("a.jpg")).await.unwrap();

        store
            .update_if_status(created.id, DetectionStatus::Pending, DetectionUpdate::processing())
            .await
            .unwrap();
        let second = store
            .update_if_status(created.id, DetectionStatus::Pending, DetectionUpdate::processing())
            .await;

        assert!(matches!(
            second,
            Err(StoreError::Conflict {
                actual: DetectionStatus::Processing,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paged() {
        let store = InMemoryRecordStore::new();
        let mut ids = Vec::new();
        for name in ["1.jpg", "2.jpg", "3.jpg"] {
            let mut record = DetectionRecord::new(upload(name));
            record.created_at = chrono::Utc::now() + chrono::Duration::seconds(ids.len() as i64);
            ids.push(record.id);
            store.insert(record).await;
        }

        let first_page = store.list(2, 0).await.unwrap();
        assert_eq!(
            first_page.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1]]
        );
        let second_page = store.list(2, 2).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].id, ids[0]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let store = InMemoryRecordStore::new();
        let created = store.create(upload("a.jpg")).await.unwrap();
        store.delete(created.id).await.unwrap();
        assert!(matches!(store.get(created.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(created.id).await, Err(StoreError::NotFound(_))));
    }
}
