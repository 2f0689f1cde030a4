//! Shared fixtures for the integration suites: a scripted request handler
//! that records every dispatch, and a memory-backed profile store.

use async_trait::async_trait;
use cascade::api::{Request, RequestHandler, Response};
use cascade::context::Context;
use cascade::error::Error;
use cascade::storage::{MemoryStorage, StorageView};
use cascade::store::ProfileStore;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// What the handler should do for a request whose path matches.
#[derive(Clone)]
pub enum Script {
    Respond(Value),
    Fail(String),
    ErrorResponse(String),
}

/// A handler that answers from a path-keyed script and records every
/// request it sees, in order.
#[derive(Default)]
pub struct RecordingHandler {
    scripts: Mutex<Vec<(String, Script)>>,
    seen: Mutex<Vec<Request>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .push((path.to_string(), script));
    }

    /// Paths of every dispatched request, in dispatch order.
    pub fn seen_paths(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|r| r.path.clone()).collect()
    }

    pub fn seen_requests(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestHandler for RecordingHandler {
    async fn handle(&self, _ctx: &Context, req: Request) -> Result<Response, Error> {
        self.seen.lock().unwrap().push(req.clone());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| *path == req.path)
            .map(|(_, s)| s.clone());

        match script {
            None => Ok(Response::default()),
            Some(Script::Respond(value)) => {
                let data = match value {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("value".into(), other);
                        map
                    }
                };
                Ok(Response::with_data(data))
            }
            Some(Script::Fail(message)) => Err(Error::dispatch(message)),
            Some(Script::ErrorResponse(message)) => Ok(Response::error_response(message)),
        }
    }
}

/// A store over fresh in-memory storage, wired to the given handler.
pub fn memory_store(handler: Arc<dyn RequestHandler>) -> ProfileStore {
    let view = StorageView::new(Arc::new(MemoryStorage::new()), "sys/");
    ProfileStore::new(view, handler)
}
