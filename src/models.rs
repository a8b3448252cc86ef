use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Music,
    Festival,
    Sports,
    Theatre,
    Comedy,
    FoodAndDrink,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Music,
        Category::Festival,
        Category::Sports,
        Category::Theatre,
        Category::Comedy,
        Category::FoodAndDrink,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Music => "music",
            Category::Festival => "festival",
            Category::Sports => "sports",
            Category::Theatre => "theatre",
            Category::Comedy => "comedy",
            Category::FoodAndDrink => "food-and-drink",
        }
    }

    /// Wire form used in the `category=` query parameter and as the
    /// snapshot map key, e.g. `food-and-drink-tickets`.
    pub fn as_slug(self) -> String {
        format!("{}-tickets", self.name())
    }

    pub fn parse(input: &str) -> Option<Category> {
        let trimmed = input.trim().to_lowercase();
        let bare = trimmed.strip_suffix("-tickets").unwrap_or(&trimmed);
        Category::ALL.into_iter().find(|cat| cat.name() == bare)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_slug())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub country: String,
    pub city: String,
}

impl Location {
    pub fn new(country: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            city: city.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.country, self.city)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Venue {
    pub name: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub country: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub venue: Venue,
    pub category: Option<String>,
    pub genre: Option<String>,
    pub is_festival: bool,
    pub raw_data: serde_json::Value,
    pub snapshot_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TicketRecord {
    pub event_id: String,
    pub price: Option<f64>,
    pub currency: String,
    pub ticket_type: Option<String>,
    pub quantity: Option<i64>,
    pub raw_data: serde_json::Value,
    pub snapshot_timestamp: DateTime<Utc>,
}
