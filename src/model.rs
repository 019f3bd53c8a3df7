use serde::{Deserialize, Serialize};

/// Sentinel stored in `missing_fields` for ids that produced no usable data.
pub const ALL_FIELDS: &str = "all_fields";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Done,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Done => "done",
            QueueStatus::Error => "error",
        }
    }

    pub fn parse_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(QueueStatus::Pending),
            "done" => Some(QueueStatus::Done),
            "error" => Some(QueueStatus::Error),
            _ => None,
        }
    }
}

/// Where a batch of records is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Products,
    Errors,
}

impl Destination {
    pub fn table(&self) -> &'static str {
        match self {
            Destination::Products => "products",
            Destination::Errors => "product_errors",
        }
    }
}

/// Normalized product row. Only `id` is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductRecord {
    pub id: i64,
    pub name: Option<String>,
    pub url_key: Option<String>,
    pub price: Option<f64>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub missing_fields: String,
}

impl ProductRecord {
    /// Row written to error storage for an id that yielded nothing usable.
    pub fn failed(id: i64) -> Self {
        Self {
            id,
            name: None,
            url_key: None,
            price: None,
            description: None,
            image_url: None,
            missing_fields: ALL_FIELDS.to_string(),
        }
    }
}

/// Why an id ended up in error storage. The display string is what lands in
/// `work_queue.last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureReason {
    NotFound,
    RetriesExhausted,
    UnexpectedStatus(u16),
    EmptyPayload,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NotFound => f.write_str("404 Not Found"),
            FailureReason::RetriesExhausted => f.write_str("Failed after retries"),
            FailureReason::UnexpectedStatus(code) => write!(f, "Unexpected status {}", code),
            FailureReason::EmptyPayload => f.write_str("Empty payload"),
        }
    }
}
