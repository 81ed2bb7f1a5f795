//! Participant sessions
//!
//! A `Session` is the whole per-participant context: assigned counter and
//! travel context, current page, answers so far and timing. Sessions live in
//! an in-memory registry keyed by the `tdc_session` cookie; they are not
//! persisted across restarts. A periodic sweep drops sessions that have
//! gone idle and finished sessions once their grace period has passed.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tdc_common::config::SessionConfig;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Narrative framings, indexed by `counter % 4`
pub const TRAVEL_CONTEXTS: [&str; 4] = [
    "With friends and luggage",
    "Business traveler, urgent schedule",
    "Alone with a backpack",
    "In a group with a bike",
];

/// Cookie carrying the session id
pub const SESSION_COOKIE: &str = "tdc_session";

pub fn group_id(counter: u64) -> usize {
    (counter % TRAVEL_CONTEXTS.len() as u64) as usize
}

pub fn travel_context(counter: u64) -> &'static str {
    TRAVEL_CONTEXTS[group_id(counter)]
}

/// The four survey pages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    Start,
    Survey,
    Demographics,
    End,
}

impl Page {
    pub fn as_str(self) -> &'static str {
        match self {
            Page::Start => "start",
            Page::Survey => "survey",
            Page::Demographics => "demographics",
            Page::End => "end",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to one choice task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Choice {
    #[default]
    DoorA,
    DoorB,
    NoneOfBoth,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::DoorA, Choice::DoorB, Choice::NoneOfBoth];

    /// Label shown to participants and stored in the Responses table
    pub fn label(self) -> &'static str {
        match self {
            Choice::DoorA => "Door A",
            Choice::DoorB => "Door B",
            Choice::NoneOfBoth => "None of both",
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Choice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Choice::ALL
            .into_iter()
            .find(|c| c.label() == s.trim())
            .ok_or_else(|| format!("Unknown choice: '{}'", s))
    }
}

/// Answers given to the start-page check
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ComprehensionAnswers {
    pub price: String,
    pub duration: String,
    pub context: String,
}

/// One participant's state
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Participant number, read from the shared counter at creation
    pub counter: u64,
    pub travel_context: &'static str,
    /// Regular ticket price (EUR)
    pub ticket_price: f64,
    /// Trip duration (minutes)
    pub trip_duration: u32,
    pub page: Page,
    pub current_idx: usize,
    pub responses: BTreeMap<usize, Choice>,
    /// Set once the comprehension check has been answered correctly
    pub allow_start: bool,
    pub comprehension: Option<ComprehensionAnswers>,
    pub responses_submitted: bool,
    /// Demographics row stored; only the counter step may still be pending
    pub demographics_appended: bool,
    pub demographics_submitted: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(counter: u64, ticket_price: f64, trip_duration: u32, now: DateTime<Utc>) -> Self {
        Self {
            counter,
            travel_context: travel_context(counter),
            ticket_price,
            trip_duration,
            page: Page::Start,
            current_idx: 0,
            responses: BTreeMap::new(),
            allow_start: false,
            comprehension: None,
            responses_submitted: false,
            demographics_appended: false,
            demographics_submitted: false,
            started_at: now,
            ended_at: None,
        }
    }

    pub fn group_id(&self) -> usize {
        group_id(self.counter)
    }

    /// Choice preselected for question `idx`: the recorded answer, else Door A
    pub fn displayed_choice(&self, idx: usize) -> Choice {
        self.responses.get(&idx).copied().unwrap_or_default()
    }
}

pub type SessionId = Uuid;

/// Shared handle to one session; the lock serializes that participant's requests
pub type SessionHandle = Arc<Mutex<Session>>;

struct Entry {
    handle: SessionHandle,
    last_seen: Instant,
}

/// In-memory session store shared by all handlers
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Entry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session and mark it as seen now
    pub async fn get(&self, id: SessionId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = Instant::now();
        Some(entry.handle.clone())
    }

    /// Register a new session under a fresh id
    pub async fn create(&self, session: Session) -> (SessionId, SessionHandle) {
        let id = Uuid::new_v4();
        (id, self.insert(id, session).await)
    }

    /// Register `session` under `id` unless a session already holds it
    ///
    /// Returns the handle now registered under `id`, which is the existing
    /// one when two requests raced to create it.
    pub async fn insert(&self, id: SessionId, session: Session) -> SessionHandle {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id).or_insert_with(|| Entry {
            handle: Arc::new(Mutex::new(session)),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        entry.handle.clone()
    }

    /// Drop sessions idle for `idle`, and finished ones idle for `finished_grace`
    ///
    /// A session whose lock is held is serving a request and is kept.
    /// Returns the number of sessions removed.
    pub async fn sweep(&self, now: Instant, idle: Duration, finished_grace: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            let quiet = now.saturating_duration_since(entry.last_seen);
            let Ok(session) = entry.handle.try_lock() else {
                return true;
            };
            let limit = if session.page == Page::End { finished_grace } else { idle };
            quiet < limit
        });
        before - sessions.len()
    }

    /// Sweep every `sweep_interval_secs` for the life of the process
    pub fn spawn_sweeper(&self, config: &SessionConfig) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let idle = Duration::from_secs(config.idle_timeout_secs);
        let finished_grace = Duration::from_secs(config.finished_grace_secs);
        let mut ticker = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let removed = registry.sweep(Instant::now(), idle, finished_grace).await;
                if removed > 0 {
                    let remaining = registry.len().await;
                    info!(removed, remaining, "Expired sessions removed");
                } else {
                    debug!("Session sweep found nothing to remove");
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Session id from the request's `Cookie` headers, if present and well formed
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

/// `Set-Cookie` value for a new session
pub fn session_cookie(id: SessionId) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_travel_context_cycles_through_four() {
        for counter in 0..40u64 {
            let context = travel_context(counter);
            assert_eq!(context, TRAVEL_CONTEXTS[(counter % 4) as usize]);
        }
        assert_eq!(travel_context(5), "Business traveler, urgent schedule");
        assert_eq!(travel_context(7), "In a group with a bike");
        assert_eq!(travel_context(u64::MAX), TRAVEL_CONTEXTS[3]);
    }

    #[test]
    fn test_new_session() {
        let session = Session::new(5, 3.8, 60, Utc::now());
        assert_eq!(session.page, Page::Start);
        assert_eq!(session.group_id(), 1);
        assert_eq!(session.travel_context, "Business traveler, urgent schedule");
        assert!(!session.allow_start);
        assert!(session.responses.is_empty());
    }

    #[test]
    fn test_displayed_choice_defaults_to_door_a() {
        let mut session = Session::new(0, 3.8, 60, Utc::now());
        assert_eq!(session.displayed_choice(3), Choice::DoorA);
        session.responses.insert(3, Choice::NoneOfBoth);
        assert_eq!(session.displayed_choice(3), Choice::NoneOfBoth);
    }

    #[test]
    fn test_choice_labels() {
        assert_eq!("Door B".parse::<Choice>().unwrap(), Choice::DoorB);
        assert_eq!(" None of both ".parse::<Choice>().unwrap(), Choice::NoneOfBoth);
        assert!("Door C".parse::<Choice>().is_err());
        assert_eq!(Choice::DoorA.to_string(), "Door A");
    }

    #[test]
    fn test_cookie_parsing() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}={}; other=1", SESSION_COOKIE, id)).unwrap(),
        );
        assert_eq!(session_id_from_headers(&headers), Some(id));
    }

    #[test]
    fn test_cookie_parsing_rejects_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id_from_headers(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("tdc_session=not-a-uuid"));
        assert_eq!(session_id_from_headers(&headers), None);
    }

    #[test]
    fn test_set_cookie_value() {
        let id = Uuid::nil();
        let cookie = session_cookie(id);
        assert!(cookie.starts_with("tdc_session=00000000-0000-0000-0000-000000000000;"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty().await);

        let (id, handle) = registry.create(Session::new(2, 3.8, 60, Utc::now())).await;
        handle.lock().await.current_idx = 4;

        let fetched = registry.get(id).await.unwrap();
        assert_eq!(fetched.lock().await.current_idx, 4);
        assert!(registry.get(Uuid::new_v4()).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_keeps_first_session() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        registry.insert(id, Session::new(2, 3.8, 60, Utc::now())).await;
        let handle = registry.insert(id, Session::new(9, 3.8, 60, Utc::now())).await;
        assert_eq!(handle.lock().await.counter, 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_and_finished_sessions() {
        let registry = SessionRegistry::new();
        let idle = Duration::from_secs(3600);
        let grace = Duration::from_secs(60);

        let (active, _) = registry.create(Session::new(1, 3.8, 60, Utc::now())).await;
        let (finished, handle) = registry.create(Session::new(2, 3.8, 60, Utc::now())).await;
        handle.lock().await.page = Page::End;

        // Nothing has been quiet long enough yet
        assert_eq!(registry.sweep(Instant::now(), idle, grace).await, 0);

        // Past the grace period only the finished session goes
        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.sweep(later, idle, grace).await, 1);
        assert!(registry.get(finished).await.is_none());
        assert!(registry.get(active).await.is_some());

        // Past the idle timeout everything goes
        let much_later = Instant::now() + Duration::from_secs(7200);
        assert_eq!(registry.sweep(much_later, idle, grace).await, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_skips_sessions_in_use() {
        let registry = SessionRegistry::new();
        let (id, handle) = registry.create(Session::new(1, 3.8, 60, Utc::now())).await;

        let guard = handle.lock().await;
        let much_later = Instant::now() + Duration::from_secs(7200);
        let removed = registry
            .sweep(much_later, Duration::from_secs(60), Duration::from_secs(60))
            .await;
        assert_eq!(removed, 0);
        drop(guard);

        assert_eq!(
            registry
                .sweep(much_later, Duration::from_secs(60), Duration::from_secs(60))
                .await,
            1
        );
        assert!(registry.get(id).await.is_none());
    }
}
