//! Seeding an empty database from a JSON document.

use std::path::Path;

use serde::Deserialize;

use super::Repository;
use crate::auth::hash_password;
use crate::errors::AppError;
use crate::models::{default_avatar, Mission, Participation, User};

/// Layout of the seed file: `{ "missions": [...], "users": [...], "participations": [...] }`.
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub missions: Vec<Mission>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub participations: Vec<Participation>,
}

/// A seeded account; the password is hashed on import.
#[derive(Debug, Deserialize)]
pub struct SeedUser {
    #[serde(flatten)]
    pub user: User,
    pub password: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub missions: usize,
    pub users: usize,
    pub participations: usize,
}

impl SeedData {
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Internal(format!("Failed to read seed file {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Import `data` unless the database already holds missions.
pub async fn seed_if_empty(repo: &Repository, data: &SeedData) -> Result<Option<SeedReport>, AppError> {
    if repo.count_missions().await? > 0 {
        tracing::debug!("Database already populated, skipping seed");
        return Ok(None);
    }

    let mut report = SeedReport::default();

    for mission in &data.missions {
        repo.insert_mission(mission).await?;
        report.missions += 1;
    }

    for seed in &data.users {
        let mut user = seed.user.clone();
        if user.avatar.is_empty() {
            user.avatar = default_avatar(&user.name);
        }
        repo.insert_user(&user, &hash_password(&seed.password)?).await?;
        report.users += 1;
    }

    for participation in &data.participations {
        match repo.insert_participation(participation).await {
            Ok(()) => report.participations += 1,
            Err(e) => tracing::warn!(
                participation_id = %participation.id,
                "Skipping seed participation: {}",
                e
            ),
        }
    }

    tracing::info!(
        missions = report.missions,
        users = report.users,
        participations = report.participations,
        "Database seeded"
    );
    Ok(Some(report))
}
