use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hyper::body::Bytes;
use moka::sync::Cache;
use tf_serve::PredictionResult;
use uuid::Uuid;

pub const COOKIE_NAME: &str = "session";

/// The image most recently uploaded in a session.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    /// Lowercase `jpg`, `jpeg` or `png`
    pub extension: String,
    pub data: Bytes,
}

impl UploadedImage {
    pub fn mime(&self) -> &'static str {
        match self.extension.as_str() {
            "png" => "image/png",
            _ => "image/jpeg",
        }
    }
}

/// Per-browser state that survives re-renders.
///
/// Two observable states: no result yet, or a result for the current upload.
/// Every upload goes back to the first.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    pub upload: Option<UploadedImage>,
    pub predictions: Option<PredictionResult>,
    pub top_1_class: Option<String>,

    /// Bumped on every upload so late results for an older image are dropped
    generation: u64,
}

impl SessionState {
    pub fn upload(&mut self, image: UploadedImage) {
        self.generation += 1;
        self.upload = Some(image);
        self.clear_result();
    }

    pub fn clear_result(&mut self) {
        self.predictions = None;
        self.top_1_class = None;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Store the result of a prediction started at `generation`. Returns
    /// false, storing nothing, if a newer image was uploaded meanwhile.
    pub fn store_result(&mut self, generation: u64, predictions: PredictionResult) -> bool {
        if generation != self.generation {
            return false;
        }

        self.top_1_class = predictions.top_1().map(|p| p.class_name.clone());
        self.predictions = Some(predictions);
        true
    }

    #[cfg(test)]
    pub fn has_result(&self) -> bool {
        self.predictions.is_some()
    }
}

/// Sessions are dropped after `time_to_idle` without a request, and the
/// least recently used ones go first once `max_sessions` is reached.
pub struct SessionStore {
    sessions: Cache<Uuid, Arc<Mutex<SessionState>>>,
}

impl SessionStore {
    pub fn new(max_sessions: u64, time_to_idle: Duration) -> Self {
        SessionStore {
            sessions: Cache::builder()
                .max_capacity(max_sessions)
                .time_to_idle(time_to_idle)
                .build(),
        }
    }

    /// Look up an existing session without creating one.
    pub fn get(&self, id: Option<Uuid>) -> Option<(Uuid, Arc<Mutex<SessionState>>)> {
        let id = id?;
        self.sessions.get(&id).map(|state| (id, state))
    }

    /// Return the session for `id`, creating a fresh one if it is unknown
    /// or expired. The flag is true when a new id was issued.
    pub fn get_or_create(&self, id: Option<Uuid>) -> (Uuid, Arc<Mutex<SessionState>>, bool) {
        if let Some((id, state)) = self.get(id) {
            return (id, state, false);
        }

        let id = Uuid::new_v4();
        let state = self
            .sessions
            .get_with(id, || Arc::new(Mutex::new(SessionState::default())));
        (id, state, true)
    }

    #[cfg(test)]
    pub fn len(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }
}

/// Run `f` with the session locked. Only this session is blocked meanwhile.
pub fn with<R>(state: &Mutex<SessionState>, f: impl FnOnce(&mut SessionState) -> R) -> R {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut state)
}

/// Extract the session id from a `Cookie` header value.
pub fn parse_cookie(header: &str) -> Option<Uuid> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

pub fn set_cookie(id: Uuid) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", COOKIE_NAME, id)
}
