//! Database repository for missions, participations and users.
//!
//! Capacity and duplicate-join rules come from [`crate::guard`]; SQLite constraints back them up.

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::auth::{hash_password, password_is_acceptable, verify_password, MIN_PASSWORD_LEN};
use crate::errors::AppError;
use crate::guard::ParticipationGuard;
use crate::models::{
    default_avatar, Category, Mission, MissionPatch, Participation, ParticipationQuery,
    ParticipationStatus, RegisterRequest, User,
};

/// Compare-and-set attempts for the spot counter before reporting contention.
const SPOT_UPDATE_ATTEMPTS: usize = 8;

const MISSION_COLUMNS: &str = "id, title, description, category, date, location, spots_total, spots_taken, image, organizer, duration";
const PARTICIPATION_COLUMNS: &str = "id, user_id, mission_id, status, joined_at";
const USER_COLUMNS: &str =
    "id, name, email, avatar, missions_completed, hours_volunteered, trees_planted";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Increment the revision ID and return the new value.
    pub async fn increment_revision(&self) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        self.get_revision_id().await
    }

    // ==================== MISSION OPERATIONS ====================

    /// List missions by date, optionally restricted to one category.
    pub async fn list_missions(&self, category: Option<Category>) -> Result<Vec<Mission>, AppError> {
        let rows = match category {
            Some(category) => {
                sqlx::query(&format!(
                    "SELECT {} FROM missions WHERE category = ? ORDER BY date, id",
                    MISSION_COLUMNS
                ))
                .bind(category.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM missions ORDER BY date, id",
                    MISSION_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(mission_from_row).collect()
    }

    pub async fn get_mission(&self, id: &str) -> Result<Option<Mission>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM missions WHERE id = ?", MISSION_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(mission_from_row).transpose()
    }

    async fn require_mission(&self, id: &str) -> Result<Mission, AppError> {
        self.get_mission(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Mission {} not found", id)))
    }

    pub async fn count_missions(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM missions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Insert a mission as given, keeping its id.
    pub async fn insert_mission(&self, mission: &Mission) -> Result<(), AppError> {
        validate_spots(mission.spots_taken, mission.spots_total)?;

        sqlx::query(
            "INSERT INTO missions (id, title, description, category, date, location, spots_total, spots_taken, image, organizer, duration) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&mission.id)
        .bind(&mission.title)
        .bind(&mission.description)
        .bind(mission.category.as_str())
        .bind(&mission.date)
        .bind(&mission.location)
        .bind(mission.spots_total)
        .bind(mission.spots_taken)
        .bind(&mission.image)
        .bind(&mission.organizer)
        .bind(&mission.duration)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;
        Ok(())
    }

    /// Apply a partial update. `spotsTaken` must stay within `0..=spotsTotal`.
    pub async fn patch_mission(&self, id: &str, patch: &MissionPatch) -> Result<Mission, AppError> {
        let existing = self.require_mission(id).await?;

        let mut updated = existing.clone();
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(AppError::Validation("Mission title cannot be empty".to_string()));
            }
            updated.title = title.clone();
        }
        if let Some(description) = &patch.description {
            updated.description = description.clone();
        }
        if let Some(date) = &patch.date {
            updated.date = date.clone();
        }
        if let Some(location) = &patch.location {
            updated.location = location.clone();
        }
        if let Some(spots_taken) = patch.spots_taken {
            validate_spots(spots_taken, existing.spots_total)?;
            updated.spots_taken = spots_taken;
        }
        if let Some(image) = &patch.image {
            updated.image = image.clone();
        }
        if let Some(organizer) = &patch.organizer {
            updated.organizer = organizer.clone();
        }
        if let Some(duration) = &patch.duration {
            updated.duration = duration.clone();
        }

        sqlx::query(
            "UPDATE missions SET title = ?, description = ?, date = ?, location = ?, spots_taken = ?, image = ?, organizer = ?, duration = ? WHERE id = ?"
        )
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(&updated.date)
        .bind(&updated.location)
        .bind(updated.spots_taken)
        .bind(&updated.image)
        .bind(&updated.organizer)
        .bind(&updated.duration)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;
        Ok(updated)
    }

    /// Atomically move `spotsTaken` by one.
    ///
    /// Each attempt is a conditional update on the value just read, so two concurrent joins can
    /// never both take the last spot.
    pub async fn adjust_spots(&self, id: &str, delta: i64) -> Result<Mission, AppError> {
        for attempt in 1..=SPOT_UPDATE_ATTEMPTS {
            let mut mission = self.require_mission(id).await?;
            let next = ParticipationGuard::spots_after(&mission, delta)?;

            if next == mission.spots_taken {
                // Decrement at zero: nothing to write.
                return Ok(mission);
            }

            let result =
                sqlx::query("UPDATE missions SET spots_taken = ? WHERE id = ? AND spots_taken = ?")
                    .bind(next)
                    .bind(id)
                    .bind(mission.spots_taken)
                    .execute(&self.pool)
                    .await?;

            if result.rows_affected() == 1 {
                self.increment_revision().await?;
                mission.spots_taken = next;
                return Ok(mission);
            }

            tracing::debug!(mission_id = %id, attempt, "Spot counter contended, retrying");
        }

        Err(AppError::Conflict(format!(
            "Mission {} is being updated concurrently, try again",
            id
        )))
    }

    // ==================== PARTICIPATION OPERATIONS ====================

    /// List participations matching every present field of `query`.
    pub async fn list_participations(
        &self,
        query: &ParticipationQuery,
    ) -> Result<Vec<Participation>, AppError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM participations WHERE 1 = 1",
            PARTICIPATION_COLUMNS
        ));
        if let Some(user_id) = &query.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.as_str());
        }
        if let Some(mission_id) = &query.mission_id {
            builder.push(" AND mission_id = ").push_bind(mission_id.as_str());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY joined_at, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(participation_from_row).collect()
    }

    /// Create a confirmed participation, refusing a second one for the same pair.
    ///
    /// Does not touch the spot counter; callers adjust it separately.
    pub async fn create_participation(
        &self,
        user_id: &str,
        mission_id: &str,
    ) -> Result<Participation, AppError> {
        self.require_mission(mission_id).await?;

        let existing = self
            .list_participations(&ParticipationQuery::active(user_id, mission_id))
            .await?;
        ParticipationGuard::admit(user_id, mission_id, &existing)?;

        let participation = Participation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            mission_id: mission_id.to_string(),
            status: ParticipationStatus::Confirmed,
            joined_at: Utc::now().to_rfc3339(),
        };
        self.insert_participation(&participation).await?;

        self.increment_revision().await?;
        Ok(participation)
    }

    /// Insert a participation row as given.
    pub async fn insert_participation(&self, participation: &Participation) -> Result<(), AppError> {
        let result = sqlx::query(
            "INSERT INTO participations (id, user_id, mission_id, status, joined_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&participation.id)
        .bind(&participation.user_id)
        .bind(&participation.mission_id)
        .bind(participation.status.as_str())
        .bind(&participation.joined_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // Lost a race against another join for the same pair.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::AlreadyJoined(format!(
                    "user {} already joined mission {}",
                    participation.user_id, participation.mission_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a participation. Returns whether a row was removed.
    pub async fn delete_participation(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM participations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.increment_revision().await?;
        }
        Ok(deleted)
    }

    // ==================== USER OPERATIONS ====================

    /// Register an account. Emails are unique.
    pub async fn create_user(&self, request: &RegisterRequest) -> Result<User, AppError> {
        let name = request.name.trim();
        let email = request.email.trim();
        if name.is_empty() || email.is_empty() {
            return Err(AppError::Validation("Name and email are required".to_string()));
        }
        if !password_is_acceptable(&request.password) {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }
        if self.find_user_by_email(email).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "An account with email {} already exists",
                email
            )));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            avatar: default_avatar(name),
            missions_completed: 0,
            hours_volunteered: 0,
            trees_planted: 0,
        };
        let password_hash = hash_password(&request.password)?;
        self.insert_user(&user, &password_hash).await?;

        self.increment_revision().await?;
        Ok(user)
    }

    /// Insert a user row with an already hashed password.
    pub async fn insert_user(&self, user: &User, password_hash: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, avatar, missions_completed, hours_volunteered, trees_planted) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(password_hash)
        .bind(&user.avatar)
        .bind(user.missions_completed)
        .bind(user.hours_volunteered)
        .bind(user.trees_planted)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                AppError::Conflict(format!("An account with email {} already exists", user.email)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Check a login. Unknown email is `NotFound`, a wrong password `Unauthorized`.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<User, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {}, password_hash FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("No account found for this email".to_string()))?;

        let password_hash: String = row.try_get("password_hash")?;
        if !verify_password(password, &password_hash)? {
            return Err(AppError::Unauthorized("Incorrect password".to_string()));
        }

        Ok(user_from_row(&row)?)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }
}

fn validate_spots(spots_taken: i64, spots_total: i64) -> Result<(), AppError> {
    if spots_taken < 0 || spots_taken > spots_total {
        return Err(AppError::Validation(format!(
            "spotsTaken must be between 0 and {}, got {}",
            spots_total, spots_taken
        )));
    }
    Ok(())
}

// Helper functions for row conversion

fn mission_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Mission, AppError> {
    let category: String = row.try_get("category")?;
    let category = Category::parse(&category)
        .ok_or_else(|| AppError::Internal(format!("Unknown mission category: {}", category)))?;

    Ok(Mission {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category,
        date: row.try_get("date")?,
        location: row.try_get("location")?,
        spots_total: row.try_get("spots_total")?,
        spots_taken: row.try_get("spots_taken")?,
        image: row.try_get("image")?,
        organizer: row.try_get("organizer")?,
        duration: row.try_get("duration")?,
    })
}

fn participation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Participation, AppError> {
    let status: String = row.try_get("status")?;
    let status = ParticipationStatus::parse(&status)
        .ok_or_else(|| AppError::Internal(format!("Unknown participation status: {}", status)))?;

    Ok(Participation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        mission_id: row.try_get("mission_id")?,
        status,
        joined_at: row.try_get("joined_at")?,
    })
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        avatar: row.try_get("avatar")?,
        missions_completed: row.try_get("missions_completed")?,
        hours_volunteered: row.try_get("hours_volunteered")?,
        trees_planted: row.try_get("trees_planted")?,
    })
}
