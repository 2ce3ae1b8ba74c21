use serde::{Deserialize, Serialize};

/// Snapshot of a resolved shipping destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient_name: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub region: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
}

impl ShippingAddress {
    /// An address is deliverable once every required component is non-blank
    pub fn is_complete(&self) -> bool {
        [
            &self.recipient_name,
            &self.line1,
            &self.city,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|part| !part.trim().is_empty())
    }
}
