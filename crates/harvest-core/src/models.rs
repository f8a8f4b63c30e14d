use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// A state document as held by the document store.
pub type Document = serde_json::Map<String, Value>;

/// Identity key assigned by the store. Never surfaces in a [`Checkpoint`].
pub const ID_KEY: &str = "_id";
pub const STATUS_KEY: &str = "status";
pub const TIMESTAMP_KEY: &str = "timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HarvestStatus {
    #[default]
    HarvestPending,
    HarvestDone,
    HarvestError,
    PostProcessingDone,
}

impl HarvestStatus {
    pub const ALL: [HarvestStatus; 4] = [
        HarvestStatus::HarvestPending,
        HarvestStatus::HarvestDone,
        HarvestStatus::HarvestError,
        HarvestStatus::PostProcessingDone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestStatus::HarvestPending => "harvestPending",
            HarvestStatus::HarvestDone => "harvestDone",
            HarvestStatus::HarvestError => "harvestError",
            HarvestStatus::PostProcessingDone => "postProcessingDone",
        }
    }
}

impl fmt::Display for HarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown harvest status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for HarvestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HarvestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// The singleton harvest-state snapshot.
///
/// `timestamp` is the instant of the last successful persist and doubles as
/// the drain fence. It is `None` only before the very first write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Checkpoint {
    pub status: HarvestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Document,
}

impl Checkpoint {
    /// Builds a checkpoint from a stored document, dropping the store's
    /// identity key. Keys other than `status` and `timestamp` are carried
    /// through untouched.
    pub fn from_document(mut doc: Document) -> Result<Self, StoreError> {
        doc.remove(ID_KEY);

        let status = match doc.remove(STATUS_KEY) {
            None | Some(Value::Null) => HarvestStatus::default(),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|e: UnknownStatus| StoreError::InvalidDocument(e.to_string()))?,
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "status must be a string, got {other}"
                )));
            }
        };

        let timestamp = match doc.remove(TIMESTAMP_KEY) {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<DateTime<Utc>>(value)
                    .map_err(|e| StoreError::InvalidDocument(format!("timestamp: {e}")))?,
            ),
        };

        Ok(Self {
            status,
            timestamp,
            extra: doc,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Partial state handed to a checkpoint write.
///
/// Top-level keys replace the stored ones; keys not mentioned are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub status: Option<HarvestStatus>,
    pub fields: Document,
}

impl StateUpdate {
    pub fn new(status: HarvestStatus) -> Self {
        Self {
            status: Some(status),
            fields: Document::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Renders the update as a document stamped with the commit timestamp.
    /// `_id` and `timestamp` are owned by the store and cannot be set here.
    /// `status` only comes from [`StateUpdate::status`], never from `fields`,
    /// so a stored status always parses back into a [`HarvestStatus`].
    pub fn into_document(self, timestamp: DateTime<Utc>) -> Result<Document, StoreError> {
        let mut doc: Document = self
            .fields
            .into_iter()
            .filter(|(key, _)| key != ID_KEY && key != TIMESTAMP_KEY && key != STATUS_KEY)
            .collect();

        if let Some(status) = self.status {
            doc.insert(STATUS_KEY.to_string(), serde_json::to_value(status)?);
        }
        doc.insert(TIMESTAMP_KEY.to_string(), serde_json::to_value(timestamp)?);

        Ok(doc)
    }
}
