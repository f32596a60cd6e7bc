//! Choosing which existing participants to dial

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Offer creation time as the lookup reports it
///
/// Lookups return either epoch numbers or timestamp strings. Numbers compare
/// numerically, strings lexicographically; a numeric string compares with a
/// number by value. Anything else is not comparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreatedAt {
    Millis(i64),
    Text(String),
}

impl CreatedAt {
    fn as_millis(&self) -> Option<i64> {
        match self {
            CreatedAt::Millis(ms) => Some(*ms),
            CreatedAt::Text(text) => text.trim().parse().ok(),
        }
    }

    /// Ordering against `other`, or `None` when the two cannot be compared
    pub fn compare(&self, other: &CreatedAt) -> Option<Ordering> {
        match (self, other) {
            (CreatedAt::Text(a), CreatedAt::Text(b)) => Some(a.cmp(b)),
            _ => Some(self.as_millis()?.cmp(&other.as_millis()?)),
        }
    }

    pub fn is_newer_than(&self, other: &CreatedAt) -> bool {
        self.compare(other) == Some(Ordering::Greater)
    }
}

impl From<i64> for CreatedAt {
    fn from(ms: i64) -> Self {
        CreatedAt::Millis(ms)
    }
}

impl From<&str> for CreatedAt {
    fn from(text: &str) -> Self {
        CreatedAt::Text(text.to_string())
    }
}

impl fmt::Display for CreatedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreatedAt::Millis(ms) => write!(f, "{}", ms),
            CreatedAt::Text(text) => f.write_str(text),
        }
    }
}

/// A listening master socket reported by the participant lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOffer {
    pub connection_id: String,
    pub device_id: String,
    /// Creation time; larger is newer
    pub created_at: CreatedAt,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
}

impl OpenOffer {
    pub fn new(
        connection_id: impl Into<String>,
        device_id: impl Into<String>,
        created_at: impl Into<CreatedAt>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            device_id: device_id.into(),
            created_at: created_at.into(),
            user_id: None,
            conversation_id: None,
            store_id: None,
        }
    }
}

/// Connection ids to open slave connections toward
///
/// Keeps one offer per device, the one with the greatest `created_at`; on a
/// tie, or when the times cannot be compared, the first one seen wins. Offers from `local_device_id` are skipped.
/// The result follows the order in which devices first appear.
pub fn select_offer_targets(offers: &[OpenOffer], local_device_id: &str) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut newest: HashMap<&str, &OpenOffer> = HashMap::new();

    for offer in offers {
        if offer.device_id == local_device_id {
            continue;
        }
        match newest.get(offer.device_id.as_str()) {
            Some(current) => {
                if offer.created_at.is_newer_than(&current.created_at) {
                    newest.insert(&offer.device_id, offer);
                }
            }
            None => {
                order.push(&offer.device_id);
                newest.insert(&offer.device_id, offer);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|device| newest.get(device))
        .map(|offer| offer.connection_id.clone())
        .collect()
}
