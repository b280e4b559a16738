//! Mission model matching the mobile app's Mission interface.

use serde::{Deserialize, Serialize};

/// Kind of environmental action a mission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    BeachCleanup,
    TreePlanting,
    ZeroWaste,
    Recycling,
    Education,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::BeachCleanup,
        Category::TreePlanting,
        Category::ZeroWaste,
        Category::Recycling,
        Category::Education,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BeachCleanup => "beach-cleanup",
            Category::TreePlanting => "tree-planting",
            Category::ZeroWaste => "zero-waste",
            Category::Recycling => "recycling",
            Category::Education => "education",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Display label shown on the category chips.
    pub fn label(&self) -> &'static str {
        match self {
            Category::BeachCleanup => "Plages",
            Category::TreePlanting => "Arbres",
            Category::ZeroWaste => "Zéro Déchet",
            Category::Recycling => "Recyclage",
            Category::Education => "Éducation",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Category::BeachCleanup => "waves",
            Category::TreePlanting => "tree-pine",
            Category::ZeroWaste => "recycle",
            Category::Recycling => "package",
            Category::Education => "book-open",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Category::BeachCleanup => "#0EA5E9",
            Category::TreePlanting => "#22C55E",
            Category::ZeroWaste => "#F59E0B",
            Category::Recycling => "#8B5CF6",
            Category::Education => "#EC4899",
        }
    }
}

/// A volunteering mission with a fixed number of spots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub date: String,
    pub location: String,
    pub spots_total: i64,
    pub spots_taken: i64,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub organizer: String,
    #[serde(default)]
    pub duration: String,
}

impl Mission {
    pub fn spots_left(&self) -> i64 {
        (self.spots_total - self.spots_taken).max(0)
    }

    pub fn is_full(&self) -> bool {
        self.spots_left() == 0
    }
}

/// Filter accepted by the mission list endpoint.
///
/// `search` is serialized as `q` to match the list endpoint's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, rename = "q", skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl MissionFilter {
    /// Build a filter, dropping blank search text.
    pub fn new(category: Option<Category>, search: &str) -> Self {
        let search = search.trim();
        Self {
            category,
            search: (!search.is_empty()).then(|| search.to_string()),
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.category.is_none() && self.search.is_none()
    }
}

/// Partial update for a mission. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spots_taken: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Request body for the atomic spot counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpotAdjustment {
    pub delta: i64,
}
