use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use shared::DetectionStatus;
use std::collections::HashMap;
use uuid::Uuid;

use super::{DetectionOutcome, DetectionRecord, DetectionUpdate, NewDetection, RecordStore, StoreError};

type Item = HashMap<String, AttributeValue>;

#[derive(Clone)]
pub struct DynamoDbRecordStore {
    client: Client,
    table_name: String,
}

impl DynamoDbRecordStore {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    pub async fn from_env(table_name: String) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        info!("DynamoDB record store initialized for table: {}", table_name);
        Self::new(Client::new(&config), table_name)
    }

    async fn put(&self, record: &DetectionRecord, expected: Option<DetectionStatus>) -> Result<(), StoreError> {
        let item = record_to_item(record)?;
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item));
        if let Some(expected) = expected {
            request = request
                .condition_expression("#status = :expected")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(":expected", AttributeValue::S(expected.to_string()));
        }
        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let conditional_failed = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if let (true, Some(expected)) = (conditional_failed, expected) {
                    let actual = self.get(record.id).await?.status;
                    warn!(
                        "Conditional write for detection {} lost: expected {}, found {}",
                        record.id, expected, actual
                    );
                    return Err(StoreError::Conflict {
                        id: record.id,
                        expected,
                        actual,
                    });
                }
                error!("DynamoDB put_item failed for detection {}: {:?}", record.id, e);
                Err(StoreError::Backend(e.to_string()))
            }
        }
    }

    async fn scan_all(&self) -> Result<Vec<DetectionRecord>, StoreError> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| {
                    error!("DynamoDB scan failed on {}: {:?}", self.table_name, e);
                    StoreError::Backend(e.to_string())
                })?;
            if let Some(items) = output.items {
                for item in &items {
                    records.push(item_to_record(item)?);
                }
            }
            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for DynamoDbRecordStore {
    async fn create(&self, new: NewDetection) -> Result<DetectionRecord, StoreError> {
        let record = DetectionRecord::new(new);
        info!("Creating detection {} in {}", record.id, self.table_name);
        self.put(&record, None).await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<DetectionRecord, StoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| {
                error!("DynamoDB get_item failed for detection {}: {:?}", id, e);
                StoreError::Backend(e.to_string())
            })?;
        match response.item {
            Some(item) => item_to_record(&item),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn update(
        &self,
        id: Uuid,
        update: DetectionUpdate,
    ) -> Result<DetectionRecord, StoreError> {
        let mut record = self.get(id).await?;
        let previous = record.status;
        record.apply(update);
        // Guard against a concurrent status change between the read and the write.
        self.put(&record, Some(previous)).await?;
        Ok(record)
    }

    async fn update_if_status(
        &self,
        id: Uuid,
        expected: DetectionStatus,
        update: DetectionUpdate,
    ) -> Result<DetectionRecord, StoreError> {
        let mut record = self.get(id).await?;
        if record.status != expected {
            return Err(StoreError::Conflict {
                id,
                expected,
                actual: record.status,
            });
        }
        record.apply(update);
        self.put(&record, Some(expected)).await?;
        debug!("Detection {} moved from {} to {}", id, expected, record.status);
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .condition_expression("attribute_exists(id)")
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if missing {
                    Err(StoreError::NotFound(id))
                } else {
                    error!("DynamoDB delete_item failed for detection {}: {:?}", id, e);
                    Err(StoreError::Backend(e.to_string()))
                }
            }
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<DetectionRecord>, StoreError> {
        let mut records = self.scan_all().await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.scan_all().await?.len())
    }
}

fn record_to_item(record: &DetectionRecord) -> Result<Item, StoreError> {
    debug!("Converting detection {} to DynamoDB attributes", record.id);
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(record.id.to_string()));
    item.insert("media_path".to_string(), AttributeValue::S(record.media_path.clone()));
    item.insert("media_type".to_string(), AttributeValue::S(record.media_type.clone()));
    item.insert("file_name".to_string(), AttributeValue::S(record.file_name.clone()));
    item.insert("file_size".to_string(), AttributeValue::N(record.file_size.to_string()));
    if let Some(description) = &record.description {
        item.insert("description".to_string(), AttributeValue::S(description.clone()));
    }
    item.insert("status".to_string(), AttributeValue::S(record.status.to_string()));
    if let Some(outcome) = &record.outcome {
        item.insert("result".to_string(), AttributeValue::S(outcome.result.to_string()));
        item.insert(
            "confidence_score".to_string(),
            AttributeValue::N(outcome.confidence_score.to_string()),
        );
        item.insert(
            "confidence_level".to_string(),
            AttributeValue::S(outcome.confidence_level.to_string()),
        );
        item.insert(
            "processing_time_seconds".to_string(),
            AttributeValue::N(outcome.processing_time_seconds.to_string()),
        );
        item.insert(
            "model_version".to_string(),
            AttributeValue::S(outcome.model_version.clone()),
        );
    }
    if let Some(error_message) = &record.error_message {
        item.insert("error_message".to_string(), AttributeValue::S(error_message.clone()));
    }
    item.insert(
        "metadata".to_string(),
        AttributeValue::S(serde_json::to_string(&record.metadata)?),
    );
    item.insert("created_at".to_string(), AttributeValue::S(record.created_at.to_rfc3339()));
    if let Some(updated_at) = &record.updated_at {
        item.insert("updated_at".to_string(), AttributeValue::S(updated_at.to_rfc3339()));
    }
    Ok(item)
}

fn item_to_record(item: &Item) -> Result<DetectionRecord, StoreError> {
    let id = Uuid::parse_str(required_s(item, "id")?)
        .map_err(|e| StoreError::InvalidData(format!("id: {}", e)))?;
    let status = parse_s(item, "status")?;
    let outcome = match optional_s(item, "result") {
        Some(result) => Some(DetectionOutcome {
            result: result
                .parse()
                .map_err(|_| StoreError::InvalidData(format!("result: {}", result)))?,
            confidence_score: required_n(item, "confidence_score")?,
            confidence_level: parse_s(item, "confidence_level")?,
            processing_time_seconds: required_n(item, "processing_time_seconds")?,
            model_version: required_s(item, "model_version")?.to_string(),
        }),
        None => None,
    };
    let metadata = match optional_s(item, "metadata") {
        Some(json) => serde_json::from_str(json)?,
        None => HashMap::new(),
    };
    Ok(DetectionRecord {
        id,
        media_path: required_s(item, "media_path")?.to_string(),
        media_type: required_s(item, "media_type")?.to_string(),
        file_name: required_s(item, "file_name")?.to_string(),
        file_size: required_n(item, "file_size")?,
        description: optional_s(item, "description").map(str::to_string),
        status,
        outcome,
        error_message: optional_s(item, "error_message").map(str::to_string),
        metadata,
        created_at: parse_timestamp(required_s(item, "created_at")?)?,
        updated_at: optional_s(item, "updated_at").map(parse_timestamp).transpose()?,
    })
}

fn optional_s<'a>(item: &'a Item, key: &str) -> Option<&'a str> {
    item.get(key).and_then(|av| av.as_s().ok()).map(String::as_str)
}

fn required_s<'a>(item: &'a Item, key: &str) -> Result<&'a str, StoreError> {
    optional_s(item, key).ok_or_else(|| StoreError::InvalidData(format!("missing {} attribute", key)))
}

fn parse_s<T: std::str::FromStr>(item: &Item, key: &str) -> Result<T, StoreError> {
    let raw = required_s(item, key)?;
    raw.parse()
        .map_err(|_| StoreError::InvalidData(format!("{}: {}", key, raw)))
}

fn required_n<T: std::str::FromStr>(item: &Item, key: &str) -> Result<T, StoreError> {
    let raw = item
        .get(key)
        .and_then(|av| av.as_n().ok())
        .ok_or_else(|| StoreError::InvalidData(format!("missing {} attribute", key)))?;
    raw.parse()
        .map_err(|_| StoreError::InvalidData(format!("{}: {}", key, raw)))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("timestamp {}: {}", raw, e)))
}
