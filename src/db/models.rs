//! Database model types.

use serde::{Deserialize, Serialize};

/// A monitored network device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    /// Hostname or IP address, stored in the `ip` column.
    pub address: String,
    /// Stored in the `status` column as 0/1.
    pub enabled: bool,
}

impl Device {
    pub fn status_label(&self) -> &'static str {
        if self.enabled {
            "Enabled"
        } else {
            "Disabled"
        }
    }
}
