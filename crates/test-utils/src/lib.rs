//! Sift test utilities.
//!
//! Row fixtures for exercising the query compiler against the in-memory
//! adapter: a catalogue-style row builder and ready-made row sets.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue, json};
use uuid::Uuid;

/// Create a test row with default values.
pub fn test_row(id: i64, name: &str) -> TestRow {
    TestRow {
        id,
        uuid: Uuid::now_v7(),
        name: name.to_string(),
        description: String::new(),
        price: 0.0,
        is_popular: false,
        display_order: 0,
        created_at: base_time(),
        category: None,
        offerings: Vec::new(),
    }
}

/// Fixed reference time so fixtures sort deterministically.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A test row builder for creating fixtures.
#[derive(Debug, Clone)]
pub struct TestRow {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub is_popular: bool,
    pub display_order: i64,
    pub created_at: DateTime<Utc>,
    pub category: Option<String>,
    pub offerings: Vec<String>,
}

impl TestRow {
    /// Set the description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the price.
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    /// Mark as popular.
    pub fn popular(mut self) -> Self {
        self.is_popular = true;
        self
    }

    /// Set the display order.
    pub fn with_display_order(mut self, display_order: i64) -> Self {
        self.display_order = display_order;
        self
    }

    /// Set creation time as days after the reference time.
    pub fn created_days_after(mut self, days: i64) -> Self {
        self.created_at = base_time() + Duration::days(days);
        self
    }

    /// Attach a to-one category by name.
    pub fn in_category(mut self, name: &str) -> Self {
        self.category = Some(name.to_string());
        self
    }

    /// Attach a to-many offering by title.
    pub fn with_offering(mut self, title: &str) -> Self {
        self.offerings.push(title.to_string());
        self
    }

    /// Render as a JSON row with camelCase keys.
    pub fn to_json(&self) -> JsonValue {
        let mut row = Map::new();
        row.insert("id".into(), json!(self.id));
        row.insert("uuid".into(), json!(self.uuid));
        row.insert("name".into(), json!(self.name));
        row.insert("description".into(), json!(self.description));
        row.insert("price".into(), json!(self.price));
        row.insert("isPopular".into(), json!(self.is_popular));
        row.insert("displayOrder".into(), json!(self.display_order));
        row.insert("createdAt".into(), json!(self.created_at.to_rfc3339()));
        row.insert(
            "category".into(),
            match &self.category {
                Some(name) => json!({"name": name}),
                None => JsonValue::Null,
            },
        );
        row.insert(
            "offerings".into(),
            JsonValue::Array(
                self.offerings
                    .iter()
                    .map(|title| json!({"title": title}))
                    .collect(),
            ),
        );
        JsonValue::Object(row)
    }
}

/// Render a set of builders as rows.
pub fn rows(builders: &[TestRow]) -> Vec<JsonValue> {
    builders.iter().map(TestRow::to_json).collect()
}

/// Twenty catalogue rows: ids 1..=20, every third row unpopular
/// (`id % 3 == 0`), so 14 rows are popular. Display order runs opposite to
/// id; creation time increases with id.
pub fn catalogue() -> Vec<JsonValue> {
    (1..=20)
        .map(|id| {
            let mut row = test_row(id, &format!("Part {id}"))
                .with_price(id as f64 * 2.5)
                .with_display_order(100 - id)
                .created_days_after(id);
            if id % 3 != 0 {
                row = row.popular();
            }
            row.to_json()
        })
        .collect()
}

/// Exactly `popular` popular rows followed by `other` unpopular ones.
pub fn popular_split(popular: i64, other: i64) -> Vec<JsonValue> {
    (1..=popular + other)
        .map(|id| {
            let row = test_row(id, &format!("Item {id}")).with_display_order(id);
            let row = if id <= popular { row.popular() } else { row };
            row.to_json()
        })
        .collect()
}

/// Small bicycle-parts set with categories and offerings, for search and
/// relation tests.
pub fn bike_parts() -> Vec<JsonValue> {
    rows(&[
        test_row(1, "Disc brake")
            .with_description("Hydraulic stopping power")
            .with_price(89.0)
            .popular()
            .in_category("Brakes")
            .with_offering("Pads")
            .with_offering("Rotors"),
        test_row(2, "Chain")
            .with_description("11-speed chain, pairs with brake cable kit")
            .with_price(24.5)
            .in_category("Drivetrain"),
        test_row(3, "Rim brake")
            .with_description("Lightweight caliper")
            .with_price(35.0)
            .popular()
            .in_category("Brakes")
            .with_offering("Pads"),
        test_row(4, "Saddle")
            .with_description("Carbon rails")
            .with_price(120.0)
            .created_days_after(30),
    ])
}
