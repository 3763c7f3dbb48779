//! Domain values shared by rooms, storage and views.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LiveError;

/// Canonical story point scale.
pub const STORY_POINTS: &[&str] = &["1", "2", "3", "5", "8", "13", "20", "40", "﹖"];

/// Canonical T-shirt scale.
pub const T_SHIRT: &[&str] = &["XS", "S", "M", "L", "XL", "XXL", "﹖"];

/// Maximum number of history entries kept per sizing value.
pub const MAX_BUCKET_SIZE: usize = 5;

/// A session identifier.
pub type SessionId = String;

/// Identity of a participant, supplied by the caller and trusted as-is.
///
/// Two users are the same participant when their ids match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub team: String,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            team: team.into(),
        }
    }

    /// Whether this user has the given id.
    #[must_use]
    pub fn is(&self, id: &str) -> bool {
        self.id == id
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

/// Estimation scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingType {
    #[default]
    StoryPoints,
    #[serde(rename = "T_SHIRT")]
    TShirt,
}

impl SizingType {
    /// Canonical value order for this scale.
    #[must_use]
    pub fn values(self) -> &'static [&'static str] {
        match self {
            SizingType::StoryPoints => STORY_POINTS,
            SizingType::TShirt => T_SHIRT,
        }
    }

    /// Whether `value` belongs to this scale.
    #[must_use]
    pub fn accepts(self, value: &str) -> bool {
        self.values().contains(&value)
    }

    /// Wire name of the scale.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SizingType::StoryPoints => "STORY_POINTS",
            SizingType::TShirt => "T_SHIRT",
        }
    }
}

impl fmt::Display for SizingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizingType {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STORY_POINTS" => Ok(SizingType::StoryPoints),
            "T_SHIRT" => Ok(SizingType::TShirt),
            other => Err(LiveError::InvalidInput(format!("unknown sizing type {other}"))),
        }
    }
}

/// A work item under estimation, or a previously sized one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Storage id; 0 until the ticket is first persisted.
    pub id: i64,
    pub summary: String,
    pub url: String,
    pub sizing_type: SizingType,
    pub sizing_value: String,
}

impl Ticket {
    /// An empty ticket sized with `sizing_type`.
    #[must_use]
    pub fn new(sizing_type: SizingType) -> Self {
        Self {
            sizing_type,
            ..Self::default()
        }
    }

    /// Not yet persisted.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    /// Only valid tickets may be archived to history.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.summary.is_empty() && !self.sizing_value.is_empty()
    }
}

/// A session as known to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub team: String,
}

/// Group storage history into capped buckets and order them by the canonical
/// scale of `sizing_type`.
///
/// Within a bucket the storage order is kept; values outside the scale and
/// tickets of another scale are dropped.
#[must_use]
pub fn bucket_history(tickets: Vec<Ticket>, sizing_type: SizingType) -> Vec<Ticket> {
    let mut buckets: HashMap<String, Vec<Ticket>> = HashMap::new();

    for ticket in tickets {
        if ticket.sizing_type != sizing_type {
            continue;
        }
        let bucket = buckets.entry(ticket.sizing_value.clone()).or_default();
        if bucket.len() < MAX_BUCKET_SIZE {
            bucket.push(ticket);
        }
    }

    sizing_type
        .values()
        .iter()
        .filter_map(|value| buckets.remove(*value))
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(id: i64, value: &str) -> Ticket {
        Ticket {
            id,
            summary: format!("ticket {id}"),
            url: String::new(),
            sizing_type: SizingType::StoryPoints,
            sizing_value: value.to_string(),
        }
    }

    #[test]
    fn test_user_equality_by_id() {
        let a = User::new("u-1", "Alice", "core");
        let renamed = User::new("u-1", "Alice B.", "core");
        let b = User::new("u-2", "Alice", "core");
        assert_eq!(a, renamed);
        assert_ne!(a, b);
        assert!(a.is("u-1"));
    }

    #[test]
    fn test_sizing_type_names() {
        assert_eq!("T_SHIRT".parse::<SizingType>().unwrap(), SizingType::TShirt);
        assert_eq!(SizingType::StoryPoints.to_string(), "STORY_POINTS");
        assert!("FIBONACCI".parse::<SizingType>().is_err());
        assert_eq!(
            serde_json::to_string(&SizingType::TShirt).unwrap(),
            "\"T_SHIRT\""
        );
        assert_eq!(
            serde_json::to_string(&SizingType::StoryPoints).unwrap(),
            "\"STORY_POINTS\""
        );
    }

    #[test]
    fn test_scale_membership() {
        assert!(SizingType::StoryPoints.accepts("13"));
        assert!(!SizingType::StoryPoints.accepts("XL"));
        assert!(SizingType::TShirt.accepts("﹖"));
    }

    #[test]
    fn test_ticket_validity() {
        let mut ticket = Ticket::new(SizingType::StoryPoints);
        assert!(ticket.is_new());
        assert!(!ticket.is_valid());

        ticket.summary = "Login page".into();
        assert!(!ticket.is_valid());

        ticket.sizing_value = "3".into();
        assert!(ticket.is_valid());
    }

    #[test]
    fn test_bucket_history_orders_by_scale() {
        let tickets = vec![
            sized(1, "13"),
            sized(2, "﹖"),
            sized(3, "1"),
            sized(4, "13"),
            sized(5, "3"),
        ];

        let history = bucket_history(tickets, SizingType::StoryPoints);
        let order: Vec<(i64, &str)> = history
            .iter()
            .map(|t| (t.id, t.sizing_value.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(3, "1"), (5, "3"), (1, "13"), (4, "13"), (2, "﹖")]
        );
    }

    #[test]
    fn test_bucket_history_caps_each_value() {
        let tickets: Vec<Ticket> = (1..=8)
            .map(|id| sized(id, "5"))
            .chain((9..=10).map(|id| sized(id, "8")))
            .collect();

        let history = bucket_history(tickets, SizingType::StoryPoints);
        let fives: Vec<i64> = history
            .iter()
            .filter(|t| t.sizing_value == "5")
            .map(|t| t.id)
            .collect();
        assert_eq!(fives, vec![1, 2, 3, 4, 5]);
        assert_eq!(history.len(), MAX_BUCKET_SIZE + 2);
    }

    #[test]
    fn test_bucket_history_drops_foreign_values() {
        let mut shirt = sized(1, "XL");
        shirt.sizing_type = SizingType::TShirt;
        let tickets = vec![shirt, sized(2, "7"), sized(3, "2")];

        let history = bucket_history(tickets, SizingType::StoryPoints);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, 3);
    }
}
