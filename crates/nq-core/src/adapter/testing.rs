//! Scripted upstream client for adapter tests.

use super::upstream::{AdapterError, UpstreamClient};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves fixed documents by URL and records every fetch
#[derive(Default)]
pub(crate) struct ScriptedUpstream {
    documents: Mutex<HashMap<String, Result<Bytes, u16>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, url: &str, body: &str) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(Bytes::from(body.to_string())));
    }

    pub(crate) fn fail(&self, url: &str, status: u16) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(status));
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn fetch(&self, url: &str) -> Result<Bytes, AdapterError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.documents.lock().unwrap().get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(status)) => Err(AdapterError::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(AdapterError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
