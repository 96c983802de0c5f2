//! A scripted `Fetcher`: maps `expected_id` to a canned payload or error,
//! so adapter tests can drive `fetch_general_data` without a real source.

use harvest_core::{FetchError, Fetcher};
use harvest_protocol::FetchPhase;
use std::collections::HashMap;
use std::sync::Mutex;

enum Scripted {
    Ok(serde_json::Value),
    Err(FetchErrorKind),
}

#[derive(Clone, Copy)]
enum FetchErrorKind {
    Timeout,
    IgnoreCaptcha,
    UnimplementedCaptcha,
    EndOfIteration,
}

impl FetchErrorKind {
    fn into_error(self) -> FetchError {
        match self {
            FetchErrorKind::Timeout => FetchError::Timeout,
            FetchErrorKind::IgnoreCaptcha => FetchError::IgnoreCaptcha,
            FetchErrorKind::UnimplementedCaptcha => FetchError::UnimplementedCaptcha,
            FetchErrorKind::EndOfIteration => FetchError::EndOfIteration,
        }
    }
}

pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Scripted>>,
    default: serde_json::Value,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        ScriptedFetcher { responses: Mutex::new(HashMap::new()), default: serde_json::json!({}) }
    }

    pub fn with_default(default: serde_json::Value) -> Self {
        ScriptedFetcher { responses: Mutex::new(HashMap::new()), default }
    }

    pub fn script_ok(&self, expected_id: &str, payload: serde_json::Value) {
        self.responses.lock().unwrap().insert(expected_id.to_string(), Scripted::Ok(payload));
    }

    pub fn script_timeout(&self, expected_id: &str) {
        self.responses.lock().unwrap().insert(expected_id.to_string(), Scripted::Err(FetchErrorKind::Timeout));
    }

    pub fn script_end_of_iteration(&self, expected_id: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(expected_id.to_string(), Scripted::Err(FetchErrorKind::EndOfIteration));
    }

    pub fn script_ignore_captcha(&self, expected_id: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(expected_id.to_string(), Scripted::Err(FetchErrorKind::IgnoreCaptcha));
    }

    pub fn script_unimplemented_captcha(&self, expected_id: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(expected_id.to_string(), Scripted::Err(FetchErrorKind::UnimplementedCaptcha));
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, phase: &FetchPhase) -> Result<serde_json::Value, FetchError> {
        let responses = self.responses.lock().unwrap();
        match responses.get(phase.expected_id()) {
            Some(Scripted::Ok(payload)) => Ok(payload.clone()),
            Some(Scripted::Err(kind)) => Err(kind.into_error()),
            None => Ok(self.default.clone()),
        }
    }
}
