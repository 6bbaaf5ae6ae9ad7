//! Record types for store tests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::HistoryRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub value: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub owner: String,
    pub value: u32,
    pub at: DateTime<Utc>,
}

impl HistoryRecord for Change {
    fn owner_id(&self) -> &str {
        &self.owner
    }
}

pub fn counter(value: u32) -> Counter {
    Counter {
        value,
        updated_at: Utc::now(),
    }
}

pub fn change(owner: &str, value: u32) -> Change {
    Change {
        owner: owner.to_string(),
        value,
        at: Utc::now(),
    }
}
