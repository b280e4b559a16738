//! Values held by the cache, one variant per key kind.

use crate::models::{Mission, Participation, User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Missions(Vec<Mission>),
    Mission(Mission),
    Participations(Vec<Participation>),
    User(User),
}

impl CacheValue {
    /// Every cached copy of mission `id` inside this value.
    pub fn missions_mut(&mut self, id: &str) -> Vec<&mut Mission> {
        match self {
            CacheValue::Missions(list) => list.iter_mut().filter(|m| m.id == id).collect(),
            CacheValue::Mission(mission) if mission.id == id => vec![mission],
            _ => Vec::new(),
        }
    }

    pub fn find_mission(&self, id: &str) -> Option<&Mission> {
        match self {
            CacheValue::Missions(list) => list.iter().find(|m| m.id == id),
            CacheValue::Mission(mission) if mission.id == id => Some(mission),
            _ => None,
        }
    }
}

/// Conversion between a typed query result and its cache representation.
pub trait Cacheable: Sized + Clone {
    fn from_cache(value: &CacheValue) -> Option<Self>;
    fn into_cache(self) -> CacheValue;
}

impl Cacheable for Vec<Mission> {
    fn from_cache(value: &CacheValue) -> Option<Self> {
        match value {
            CacheValue::Missions(list) => Some(list.clone()),
            _ => None,
        }
    }

    fn into_cache(self) -> CacheValue {
        CacheValue::Missions(self)
    }
}

impl Cacheable for Mission {
    fn from_cache(value: &CacheValue) -> Option<Self> {
        match value {
            CacheValue::Mission(mission) => Some(mission.clone()),
            _ => None,
        }
    }

    fn into_cache(self) -> CacheValue {
        CacheValue::Mission(self)
    }
}

impl Cacheable for Vec<Participation> {
    fn from_cache(value: &CacheValue) -> Option<Self> {
        match value {
            CacheValue::Participations(list) => Some(list.clone()),
            _ => None,
        }
    }

    fn into_cache(self) -> CacheValue {
        CacheValue::Participations(self)
    }
}

impl Cacheable for User {
    fn from_cache(value: &CacheValue) -> Option<Self> {
        match value {
            CacheValue::User(user) => Some(user.clone()),
            _ => None,
        }
    }

    fn into_cache(self) -> CacheValue {
        CacheValue::User(self)
    }
}
