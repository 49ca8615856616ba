use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use physio_core::config::ReconcileConfig;
use physio_core::wizard::WizardState;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clients::{DEFAULT_UPSTREAM_TIMEOUT, HttpAnalysisClient, HttpBackendClient};

/// One operator's wizard, kept in memory for the lifetime of the process.
#[derive(Debug)]
pub struct ImportSession {
    pub wizard: WizardState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportSession {
    pub fn new(config: ReconcileConfig) -> Self {
        let now = Utc::now();
        Self {
            wizard: WizardState::new(config),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub type SessionStore = Arc<RwLock<HashMap<Uuid, ImportSession>>>;

const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub config: ReconcileConfig,
    pub analysis: HttpAnalysisClient,
    pub backend: HttpBackendClient,
    /// Sessions untouched for longer than this are dropped by the reaper
    pub session_ttl: Duration,
}

impl AppState {
    pub fn new(
        config: ReconcileConfig,
        analysis: HttpAnalysisClient,
        backend: HttpBackendClient,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            analysis,
            backend,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Drop sessions idle since before `now - session_ttl`. Sessions with a
    /// boundary call in flight are kept; their completion touches them.
    pub async fn evict_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(self.session_ttl) else {
            return 0;
        };
        let cutoff = now - ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            session.updated_at > cutoff
                || session.wizard.is_analyzing()
                || session.wizard.is_importing()
        });
        before - sessions.len()
    }

    pub fn from_env() -> Self {
        let analysis_url = std::env::var("PHYSIO_ANALYSIS_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());
        let backend_url = std::env::var("PHYSIO_BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:8082".to_string());
        let backend_token = std::env::var("PHYSIO_BACKEND_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let upstream_timeout = Duration::from_secs(env_secs(
            "PHYSIO_UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT.as_secs(),
        ));
        let session_ttl =
            Duration::from_secs(env_secs("PHYSIO_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS));

        Self::new(
            ReconcileConfig::from_env(),
            HttpAnalysisClient::new(analysis_url).with_timeout(upstream_timeout),
            HttpBackendClient::new(backend_url, backend_token).with_timeout(upstream_timeout),
        )
        .with_session_ttl(session_ttl)
    }
}

fn env_secs(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                tracing::warn!(name, value = %raw, default, "ignoring invalid duration");
                default
            }
        },
        Err(_) => default,
    }
}

/// Periodically evict idle sessions for as long as the process runs.
pub fn spawn_session_reaper(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = (state.session_ttl / 4).clamp(MIN_REAP_INTERVAL, MAX_REAP_INTERVAL);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let evicted = state.evict_idle_sessions(Utc::now()).await;
            if evicted > 0 {
                tracing::info!(evicted, "evicted idle import sessions");
            }
        }
    })
}
