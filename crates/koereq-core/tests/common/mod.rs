//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use koereq_core::{
    ManualReachability, MedicalRequest, NewMedicalRequest, RemoteClient, RequestStore,
    SubmitError, SyncConfig, SyncEngine,
};

/// Remote whose answer per patient name is scripted. Unscripted names are
/// accepted.
#[derive(Default)]
pub struct ScriptedRemote {
    failures: Mutex<HashMap<String, SubmitError>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn fail(&self, patient: &str, error: SubmitError) {
        self.failures
            .lock()
            .unwrap()
            .insert(patient.to_string(), error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Patient names in submission order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn submit(&self, request: &MedicalRequest) -> Result<(), SubmitError> {
        self.calls.lock().unwrap().push(request.patient_name.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().unwrap().get(&request.patient_name).cloned();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct Harness {
    pub store: Arc<RequestStore>,
    pub remote: Arc<ScriptedRemote>,
    pub reachability: Arc<ManualReachability>,
    pub engine: Arc<SyncEngine>,
    pub config: SyncConfig,
}

pub fn config() -> SyncConfig {
    SyncConfig {
        submit_timeout_ms: 200,
        periodic_interval_secs: 5,
        ..Default::default()
    }
}

pub fn harness(online: bool) -> Harness {
    harness_with_store(RequestStore::open_in_memory().unwrap(), online)
}

pub fn harness_with_store(store: RequestStore, online: bool) -> Harness {
    let store = Arc::new(store);
    let remote = Arc::new(ScriptedRemote::default());
    let reachability = Arc::new(ManualReachability::new(online));
    let config = config();
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&store),
        remote.clone(),
        reachability.clone(),
        &config,
    ));
    Harness {
        store,
        remote,
        reachability,
        engine,
        config,
    }
}

pub fn make_request(patient: &str, symptoms: &str) -> MedicalRequest {
    NewMedicalRequest::new(patient, symptoms)
        .into_request()
        .unwrap()
}
