//! Structured cache keys and the scopes used to match them.
//!
//! Scope rules:
//! - `Missions` covers every mission list, whatever its filter.
//! - `Mission` covers every mission detail entry.
//! - `Participations` covers every user's participation list.
//! - `User` covers every profile entry.
//!
//! Lists and details are separate scopes: invalidating `Missions` leaves details alone.

use std::fmt;

use crate::models::MissionFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScope {
    Missions,
    Mission,
    Participations,
    User,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::Missions => "missions",
            KeyScope::Mission => "mission",
            KeyScope::Participations => "participations",
            KeyScope::User => "user",
        }
    }
}

/// Identity of one cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// Mission list for one filter.
    Missions(MissionFilter),
    /// One mission by id.
    Mission(String),
    /// Confirmed participations of one user.
    Participations(String),
    /// One user profile by id.
    User(String),
}

impl QueryKey {
    pub fn scope(&self) -> KeyScope {
        match self {
            QueryKey::Missions(_) => KeyScope::Missions,
            QueryKey::Mission(_) => KeyScope::Mission,
            QueryKey::Participations(_) => KeyScope::Participations,
            QueryKey::User(_) => KeyScope::User,
        }
    }

    /// The unfiltered mission list.
    pub fn all_missions() -> Self {
        QueryKey::Missions(MissionFilter::default())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Missions(filter) => {
                write!(f, "missions")?;
                if let Some(category) = filter.category {
                    write!(f, "/{}", category.as_str())?;
                }
                if let Some(search) = &filter.search {
                    write!(f, "?q={}", search)?;
                }
                Ok(())
            }
            QueryKey::Mission(id) => write!(f, "mission/{}", id),
            QueryKey::Participations(user_id) => write!(f, "participations/{}", user_id),
            QueryKey::User(id) => write!(f, "user/{}", id),
        }
    }
}

/// Selects cache entries either by scope or by exact key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    Scope(KeyScope),
    Exact(QueryKey),
}

impl KeyFilter {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyFilter::Scope(scope) => key.scope() == *scope,
            KeyFilter::Exact(exact) => exact == key,
        }
    }
}

impl From<KeyScope> for KeyFilter {
    fn from(scope: KeyScope) -> Self {
        KeyFilter::Scope(scope)
    }
}

impl From<QueryKey> for KeyFilter {
    fn from(key: QueryKey) -> Self {
        KeyFilter::Exact(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    #[test]
    fn test_missions_scope_hits_every_filter_but_not_details() {
        let scope = KeyFilter::from(KeyScope::Missions);
        assert!(scope.matches(&QueryKey::all_missions()));
        assert!(scope.matches(&QueryKey::Missions(MissionFilter::new(
            Some(Category::Recycling),
            "tri"
        ))));
        assert!(!scope.matches(&QueryKey::Mission("1".into())));
        assert!(!scope.matches(&QueryKey::Participations("u1".into())));
    }

    #[test]
    fn test_exact_filter_matches_one_key() {
        let exact = KeyFilter::from(QueryKey::Participations("u1".into()));
        assert!(exact.matches(&QueryKey::Participations("u1".into())));
        assert!(!exact.matches(&QueryKey::Participations("u2".into())));
    }

    #[test]
    fn test_blank_search_shares_the_unfiltered_key() {
        assert_eq!(
            QueryKey::Missions(MissionFilter::new(None, "  ")),
            QueryKey::all_missions()
        );
    }

    #[test]
    fn test_display() {
        let key = QueryKey::Missions(MissionFilter::new(Some(Category::ZeroWaste), "vrac"));
        assert_eq!(key.to_string(), "missions/zero-waste?q=vrac");
        assert_eq!(QueryKey::Mission("7".into()).to_string(), "mission/7");
    }
}
