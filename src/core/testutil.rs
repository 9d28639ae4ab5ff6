//! Scripted fakes behind the `HttpTransport` and `TabHost` seams, shared by
//! the orchestrator, reconciler and dispatcher tests.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Mutex;

use super::tabs::{PageFetchOutcome, TabHost, TabId};
use super::transport::{HttpTransport, RequestDescriptor, TransportResult};

struct Rule {
    api_url: Option<String>,
    path: String,
    method: Option<Method>,
    outcomes: Vec<TransportResult>,
    served: usize,
}

impl Rule {
    fn matches(&self, request: &RequestDescriptor) -> bool {
        if let Some(api_url) = &self.api_url {
            if *api_url != request.api_url {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if *method != request.method {
                return false;
            }
        }
        request.path.starts_with(&self.path)
    }

    fn next(&mut self) -> TransportResult {
        let index = self.served.min(self.outcomes.len().saturating_sub(1));
        self.served += 1;
        self.outcomes[index].clone()
    }
}

/// `HttpTransport` answering from scripted rules. A rule's outcome list is
/// consumed in order; the last outcome repeats once exhausted.
pub struct FakeTransport {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn stub(&self, path: &str, outcomes: Vec<TransportResult>) {
        self.stub_at_inner(None, path, None, outcomes);
    }

    pub fn stub_method(&self, path: &str, method: Method, outcomes: Vec<TransportResult>) {
        self.stub_at_inner(None, path, Some(method), outcomes);
    }

    pub fn stub_at(
        &self,
        api_url: &str,
        path: &str,
        method: Option<Method>,
        outcomes: Vec<TransportResult>,
    ) {
        self.stub_at_inner(Some(api_url.to_string()), path, method, outcomes);
    }

    fn stub_at_inner(
        &self,
        api_url: Option<String>,
        path: &str,
        method: Option<Method>,
        outcomes: Vec<TransportResult>,
    ) {
        assert!(!outcomes.is_empty(), "a stub needs at least one outcome");
        self.rules.lock().unwrap().push(Rule {
            api_url,
            path: path.to_string(),
            method,
            outcomes,
            served: 0,
        });
    }

    /// `(api_url, path)` pairs in the order they were attempted.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult {
        self.calls
            .lock()
            .unwrap()
            .push((request.api_url.clone(), request.path.clone()));
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.matches(request) {
                return rule.next();
            }
        }
        TransportResult::NetworkFailure(format!(
            "no stub for {} {}",
            request.method, request.path
        ))
    }
}

/// `TabHost` with a fixed tab topology and scripted page-fetch outcomes.
pub struct FakeTabHost {
    existing: Option<TabId>,
    creatable: Option<TabId>,
    fetches: Mutex<Vec<PageFetchOutcome>>,
    served: Mutex<usize>,
    storage: Mutex<Option<String>>,
    opened: Mutex<Vec<String>>,
}

impl FakeTabHost {
    fn new(existing: Option<TabId>, creatable: Option<TabId>) -> Self {
        Self {
            existing,
            creatable,
            fetches: Mutex::new(Vec::new()),
            served: Mutex::new(0),
            storage: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// No tab exists and none can be created.
    pub fn unavailable() -> Self {
        Self::new(None, None)
    }

    /// A tab on the app origin is already open.
    pub fn with_tab(id: TabId) -> Self {
        Self::new(Some(id), None)
    }

    /// No tab open, but creation succeeds.
    pub fn creatable(id: TabId) -> Self {
        Self::new(None, Some(id))
    }

    pub fn push_fetch(&self, outcome: PageFetchOutcome) {
        self.fetches.lock().unwrap().push(outcome);
    }

    pub fn set_local_storage(&self, value: &str) {
        *self.storage.lock().unwrap() = Some(value.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        *self.served.lock().unwrap()
    }

    pub fn opened_origins(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabHost for FakeTabHost {
    async fn find_tab(&self, _origin: &str) -> Result<Option<TabId>> {
        Ok(self.existing)
    }

    async fn open_tab(&self, origin: &str) -> Result<Option<TabId>> {
        self.opened.lock().unwrap().push(origin.to_string());
        Ok(self.creatable)
    }

    async fn execute_fetch(
        &self,
        _tab: TabId,
        _request: &RequestDescriptor,
    ) -> Result<PageFetchOutcome> {
        let fetches = self.fetches.lock().unwrap();
        let mut served = self.served.lock().unwrap();
        let outcome = if fetches.is_empty() {
            PageFetchOutcome {
                ok: false,
                status: 0,
                content_type: String::new(),
                text: String::new(),
                network_error: Some("no scripted page fetch".to_string()),
            }
        } else {
            fetches[(*served).min(fetches.len() - 1)].clone()
        };
        *served += 1;
        Ok(outcome)
    }

    async fn read_local_storage(&self, _tab: TabId, _key: &str) -> Result<Option<String>> {
        Ok(self.storage.lock().unwrap().clone())
    }
}

/// Page-context fetch outcome carrying a JSON body.
pub fn page_json(status: u16, body: Value) -> PageFetchOutcome {
    PageFetchOutcome {
        ok: (200..300).contains(&status),
        status,
        content_type: "application/json".to_string(),
        text: body.to_string(),
        network_error: None,
    }
}
