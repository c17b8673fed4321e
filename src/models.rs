use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One catalog entry. The canonical hyphenated form of `id` doubles as the
/// entry's key in the backing file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub image_url: String,
    pub description: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specifications: Option<Vec<String>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Caller-facing input for `ItemRepository::save`. A missing id means
/// "create"; ids and timestamps are owned by the repository.
#[derive(Debug, Clone, Default)]
pub struct ItemDraft {
    pub id: Option<Uuid>,
    pub name: String,
    pub image_url: String,
    pub description: String,
    pub price: f64,
    pub rating: Option<f64>,
    pub specifications: Option<Vec<String>>,
}

impl ItemDraft {
    pub fn from_item(item: &Item) -> Self {
        Self {
            id: Some(item.id),
            name: item.name.clone(),
            image_url: item.image_url.clone(),
            description: item.description.clone(),
            price: item.price,
            rating: item.rating,
            specifications: item.specifications.clone(),
        }
    }
}

/// The whole-of-dataset value held by the storage engine. Serializes as
/// `{ "items": { "<id>": { ... } } }` — an object keyed by id, never an
/// array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub items: BTreeMap<String, Item>,
}

impl Catalog {
    pub fn get(&self, id: &Uuid) -> Option<&Item> {
        self.items.get(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fixed textual timestamp pattern used in the backing file.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    /// Current time at the persisted (millisecond) precision, so in-memory
    /// values compare equal to their round-tripped form.
    pub fn now() -> DateTime<Utc> {
        let now = Utc::now();
        now.with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
            .unwrap_or(now)
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_item() -> Item {
        Item {
            id: Uuid::parse_str("6f9a2f64-1c3b-4a8e-9d27-55c0a1b2c3d4").unwrap(),
            name: "Noise-canceling headphones".to_string(),
            image_url: "https://example.com/headphones.png".to_string(),
            description: "Over-ear, 30h battery".to_string(),
            price: 199.99,
            rating: Some(4.5),
            specifications: Some(vec!["bluetooth 5.3".to_string(), "usb-c".to_string()]),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 2, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn item_serializes_with_camel_case_keys_and_fixed_timestamps() {
        let value = serde_json::to_value(sample_item()).unwrap();
        assert_eq!(value["imageUrl"], "https://example.com/headphones.png");
        assert_eq!(value["createdAt"], "2024-03-01T12:00:00.000Z");
        assert_eq!(value["updatedAt"], "2024-03-02T08:30:00.000Z");
        assert_eq!(value["id"], "6f9a2f64-1c3b-4a8e-9d27-55c0a1b2c3d4");
    }

    #[test]
    fn absent_rating_and_specifications_are_omitted() {
        let mut item = sample_item();
        item.rating = None;
        item.specifications = None;
        let value = serde_json::to_value(item).unwrap();
        assert!(value.get("rating").is_none());
        assert!(value.get("specifications").is_none());
    }

    #[test]
    fn catalog_round_trips_as_object_of_objects() {
        let item = sample_item();
        let mut catalog = Catalog::default();
        catalog.items.insert(item.id.to_string(), item.clone());

        let json = serde_json::to_string_pretty(&catalog).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["items"].is_object());
        assert!(value["items"][item.id.to_string()].is_object());

        let reloaded: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, catalog);
    }

    #[test]
    fn catalog_parses_optional_fields_when_missing() {
        let raw = r#"{
            "items": {
                "0b8f3d1e-2a4c-4e6f-8a90-123456789abc": {
                    "id": "0b8f3d1e-2a4c-4e6f-8a90-123456789abc",
                    "name": "Basic kettle",
                    "imageUrl": "https://example.com/kettle.png",
                    "description": "1.7L",
                    "price": 24.0,
                    "createdAt": "2024-01-01T00:00:00.000Z",
                    "updatedAt": "2024-01-01T00:00:00.000Z"
                }
            }
        }"#;
        let catalog: Catalog = serde_json::from_str(raw).unwrap();
        let item = catalog.items.values().next().unwrap();
        assert!(item.rating.is_none());
        assert!(item.specifications.is_none());
        assert_eq!(item.created_at, item.updated_at);
    }
}
