use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{stand::Stand, ExampleData};

/// A driver bound to at most one home stand.
///
/// `is_available` is an independent signal and is not kept in sync with queue
/// membership, which lives in [`crate::queue::QueueEntry`].
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub name: String,
    pub phone: String,
    pub is_available: bool,
    pub stand_id: Option<Id<Stand>>,
    pub created_at: DateTime<Utc>,
}

impl HasId for Driver {
    type IdType = i64;
}

impl ExampleData for Driver {
    fn example_data() -> Self {
        Self {
            name: "John Driver".to_owned(),
            phone: "+49 431 000000".to_owned(),
            is_available: false,
            stand_id: Some(Id::new(1)),
            created_at: DateTime::default(),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub stand_id: Option<Id<Stand>>,
    pub is_available: Option<bool>,
}

impl DriverUpdate {
    pub fn apply(self, driver: Driver) -> Driver {
        Driver {
            name: self.name.unwrap_or(driver.name),
            phone: self.phone.unwrap_or(driver.phone),
            is_available: self.is_available.unwrap_or(driver.is_available),
            stand_id: self.stand_id.or(driver.stand_id),
            created_at: driver.created_at,
        }
    }
}

/// Registration data of a driver. New drivers start out unavailable.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewDriver {
    pub name: String,
    pub phone: String,
    pub stand_id: Option<Id<Stand>>,
}

impl NewDriver {
    pub fn into_driver(self, created_at: DateTime<Utc>) -> Driver {
        Driver {
            name: self.name,
            phone: self.phone,
            is_available: false,
            stand_id: self.stand_id,
            created_at,
        }
    }
}

impl ExampleData for NewDriver {
    fn example_data() -> Self {
        Self {
            name: "John Driver".to_owned(),
            phone: "+49 431 000000".to_owned(),
            stand_id: Some(Id::new(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use utility::id::Id;

    use super::{Driver, DriverUpdate};

    fn driver() -> Driver {
        Driver {
            name: "a".to_owned(),
            phone: "1".to_owned(),
            is_available: false,
            stand_id: Some(Id::new(1)),
            created_at: DateTime::default(),
        }
    }

    #[test]
    fn update_keeps_unset_fields() {
        let updated = DriverUpdate {
            stand_id: Some(Id::new(2)),
            ..Default::default()
        }
        .apply(driver());
        assert_eq!(updated.stand_id, Some(Id::new(2)));
        assert_eq!(updated.name, "a");
        assert!(!updated.is_available);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(driver()).unwrap();
        assert_eq!(json["isAvailable"], false);
        assert_eq!(json["standId"], 1);
    }
}
