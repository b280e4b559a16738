//! Shared fixtures: a live backend on an ephemeral port and a scripted in-memory backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use crate::bindings::EcoClient;
use crate::cache::CacheConfig;
use crate::client::{ClientError, ClientResult, HttpClient, ResourceClient};
use crate::config::{ClientConfig, Config};
use crate::db::{init_database, Repository};
use crate::guard::ParticipationGuard;
use crate::models::{
    Category, LoginRequest, Mission, MissionFilter, MissionPatch, Participation,
    ParticipationQuery, ParticipationStatus, RegisterRequest, User,
};
use crate::query::RetryPolicy;
use crate::search::SearchIndex;
use crate::{create_router, AppState};

pub(crate) const TEST_PSK: &str = "test-api-key";

fn mission(
    id: &str,
    title: &str,
    category: Category,
    location: &str,
    taken: i64,
    total: i64,
) -> Mission {
    Mission {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{} with the local association", title),
        category,
        date: format!("2025-0{}-12T09:00:00Z", id),
        location: location.to_string(),
        spots_total: total,
        spots_taken: taken,
        image: String::new(),
        organizer: "Eco Action".to_string(),
        duration: "3h".to_string(),
    }
}

/// Three missions in date order. Mission "2" has a single spot left.
pub(crate) fn sample_missions() -> Vec<Mission> {
    vec![
        mission("1", "Beach cleanup", Category::BeachCleanup, "Marseille", 5, 20),
        mission("2", "Urban orchard planting", Category::TreePlanting, "Lyon", 9, 10),
        mission("3", "Repair cafe", Category::ZeroWaste, "Nantes", 0, 8),
    ]
}

/// Backend served by the real router over a temporary database.
pub(crate) struct TestFixture {
    pub client: Client,
    pub base_url: String,
    pub repo: Arc<Repository>,
    psk: Option<String>,
    temp_dir: TempDir,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_psk(Some(TEST_PSK.to_string())).await
    }

    pub async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        let missions = sample_missions();
        for mission in &missions {
            repo.insert_mission(mission).await.expect("Failed to seed");
        }

        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));
        search.rebuild(&missions).await.expect("Failed to index");

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            index_path,
            seed_path: None,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
        };

        let state = AppState {
            repo: repo.clone(),
            search,
            config: Arc::new(config),
        };

        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = &psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            repo,
            psk,
            temp_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            api_key: self.psk.clone(),
            request_timeout: Duration::from_secs(5),
            retries: 0,
            session_path: self.temp_dir.path().join("session.json"),
        }
    }

    pub fn http_client(&self) -> HttpClient {
        HttpClient::new(&self.client_config()).unwrap()
    }

    pub fn eco_client(&self) -> EcoClient {
        EcoClient::new(
            Arc::new(self.http_client()),
            CacheConfig::default(),
            RetryPolicy::none(),
        )
    }
}

/// Backend operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    ListMissions,
    GetMission,
    PatchMission,
    AdjustSpots,
    ListParticipations,
    CreateParticipation,
    DeleteParticipation,
    GetUser,
    Register,
    Login,
}

/// Holds calls of one operation until opened.
pub(crate) struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// Resolves once a call has reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let every waiting and future call through.
    pub fn open(&self) {
        self.release.close();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        let _ = self.release.acquire().await;
    }
}

#[derive(Default)]
struct World {
    missions: Vec<Mission>,
    participations: Vec<Participation>,
    users: Vec<(User, String)>,
    next_id: u64,
}

/// In-memory `ResourceClient` applying the same participation rules as the server.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    world: Mutex<World>,
    failures: Mutex<HashMap<Op, VecDeque<ClientError>>>,
    gates: Mutex<HashMap<Op, Arc<Gate>>>,
    calls: Mutex<HashMap<Op, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

impl ScriptedBackend {
    pub fn with_missions(missions: Vec<Mission>) -> Self {
        let backend = Self::default();
        lock(&backend.world).missions = missions;
        backend
    }

    /// Make the next call of `op` fail with `error`. Queued failures are used in order.
    pub fn fail_next(&self, op: Op, error: ClientError) {
        lock(&self.failures).entry(op).or_default().push_back(error);
    }

    pub fn gate(&self, op: Op) -> Arc<Gate> {
        lock(&self.gates)
            .entry(op)
            .or_insert_with(|| Arc::new(Gate::new()))
            .clone()
    }

    pub fn calls(&self, op: Op) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    pub fn mission(&self, id: &str) -> Option<Mission> {
        lock(&self.world).missions.iter().find(|m| m.id == id).cloned()
    }

    pub fn participations(&self) -> Vec<Participation> {
        lock(&self.world).participations.clone()
    }

    /// Insert a confirmed participation directly, bypassing the guard and the counter.
    pub fn add_participation(&self, user_id: &str, mission_id: &str) -> Participation {
        let mut world = lock(&self.world);
        world.next_id += 1;
        let participation = Participation {
            id: format!("p{}", world.next_id),
            user_id: user_id.to_string(),
            mission_id: mission_id.to_string(),
            status: ParticipationStatus::Confirmed,
            joined_at: "2025-01-01T00:00:00Z".to_string(),
        };
        world.participations.push(participation.clone());
        participation
    }

    async fn enter(&self, op: Op) -> ClientResult<()> {
        *lock(&self.calls).entry(op).or_default() += 1;

        let gate = lock(&self.gates).get(&op).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        match lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn not_found(what: &str, id: &str) -> ClientError {
    ClientError::NotFound(format!("{} {} not found", what, id))
}

#[async_trait]
impl ResourceClient for ScriptedBackend {
    async fn list_missions(&self, filter: &MissionFilter) -> ClientResult<Vec<Mission>> {
        self.enter(Op::ListMissions).await?;
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let world = lock(&self.world);
        Ok(world
            .missions
            .iter()
            .filter(|m| filter.category.map_or(true, |c| c == m.category))
            .filter(|m| {
                needle.as_deref().map_or(true, |n| {
                    [&m.title, &m.description, &m.location]
                        .iter()
                        .any(|field| field.to_lowercase().contains(n))
                })
            })
            .cloned()
            .collect())
    }

    async fn get_mission(&self, id: &str) -> ClientResult<Mission> {
        self.enter(Op::GetMission).await?;
        self.mission(id).ok_or_else(|| not_found("mission", id))
    }

    async fn patch_mission(&self, id: &str, patch: &MissionPatch) -> ClientResult<Mission> {
        self.enter(Op::PatchMission).await?;
        let mut world = lock(&self.world);
        let mission = world
            .missions
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| not_found("mission", id))?;
        if let Some(taken) = patch.spots_taken {
            if taken < 0 || taken > mission.spots_total {
                return Err(ClientError::Validation(format!(
                    "spotsTaken must be between 0 and {}",
                    mission.spots_total
                )));
            }
            mission.spots_taken = taken;
        }
        if let Some(title) = &patch.title {
            mission.title = title.clone();
        }
        Ok(mission.clone())
    }

    async fn adjust_spots(&self, id: &str, delta: i64) -> ClientResult<Mission> {
        self.enter(Op::AdjustSpots).await?;
        let mut world = lock(&self.world);
        let mission = world
            .missions
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| not_found("mission", id))?;
        mission.spots_taken = ParticipationGuard::spots_after(mission, delta)?;
        Ok(mission.clone())
    }

    async fn list_participations(
        &self,
        query: &ParticipationQuery,
    ) -> ClientResult<Vec<Participation>> {
        self.enter(Op::ListParticipations).await?;
        Ok(lock(&self.world)
            .participations
            .iter()
            .filter(|p| query.matches(p))
            .cloned()
            .collect())
    }

    async fn create_participation(
        &self,
        user_id: &str,
        mission_id: &str,
    ) -> ClientResult<Participation> {
        self.enter(Op::CreateParticipation).await?;
        {
            let world = lock(&self.world);
            if !world.missions.iter().any(|m| m.id == mission_id) {
                return Err(not_found("mission", mission_id));
            }
            ParticipationGuard::admit(user_id, mission_id, &world.participations)?;
        }
        Ok(self.add_participation(user_id, mission_id))
    }

    async fn delete_participation(&self, id: &str) -> ClientResult<bool> {
        self.enter(Op::DeleteParticipation).await?;
        let mut world = lock(&self.world);
        let before = world.participations.len();
        world.participations.retain(|p| p.id != id);
        Ok(world.participations.len() < before)
    }

    async fn get_user(&self, id: &str) -> ClientResult<User> {
        self.enter(Op::GetUser).await?;
        lock(&self.world)
            .users
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.clone())
            .ok_or_else(|| not_found("user", id))
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<User> {
        self.enter(Op::Register).await?;
        let mut world = lock(&self.world);
        if world.users.iter().any(|(u, _)| u.email == request.email) {
            return Err(ClientError::Conflict("email already registered".into()));
        }
        world.next_id += 1;
        let user = User {
            id: format!("u{}", world.next_id),
            name: request.name.clone(),
            email: request.email.clone(),
            avatar: String::new(),
            missions_completed: 0,
            hours_volunteered: 0,
            trees_planted: 0,
        };
        world.users.push((user.clone(), request.password.clone()));
        Ok(user)
    }

    async fn login(&self, request: &LoginRequest) -> ClientResult<User> {
        self.enter(Op::Login).await?;
        let world = lock(&self.world);
        let (user, password) = world
            .users
            .iter()
            .find(|(u, _)| u.email == request.email)
            .ok_or_else(|| not_found("user", &request.email))?;
        if *password != request.password {
            return Err(ClientError::Unauthorized("wrong password".into()));
        }
        Ok(user.clone())
    }
}
