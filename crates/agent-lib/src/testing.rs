//! Test doubles shared by the unit test suites

use crate::models::{CheckReport, GraphDef, Host, HostMetricValue, HostParams, HostStatus};
use crate::sync::{ApiError, BackendApi};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// A backend call as observed by [`FakeApi`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    FindHost(String),
    FindHosts(String, Vec<HostStatus>),
    CreateHost(HostParams),
    UpdateHost(String, HostParams),
    UpdateHostStatus(String, HostStatus),
    RetireHost(String),
    PostMetricValues(Vec<HostMetricValue>),
    PostGraphDefs(Vec<GraphDef>),
    PostCheckReports(Vec<CheckReport>),
}

/// In-memory backend that records calls and fails on demand.
///
/// Failures are keyed by operation name (`"find_host"`, `"post_metric_values"`, ...):
/// queued one-shot failures are consumed first, then a sticky failure applies.
/// A hung operation records its call and then never returns.
pub(crate) struct FakeApi {
    calls: Mutex<Vec<Call>>,
    hosts: Mutex<HashMap<String, Host>>,
    next_id: Mutex<String>,
    one_shot: Mutex<HashMap<&'static str, VecDeque<ApiError>>>,
    sticky: Mutex<HashMap<&'static str, ApiError>>,
    hung: Mutex<HashSet<&'static str>>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            hosts: Mutex::new(HashMap::new()),
            next_id: Mutex::new("abcde".to_string()),
            one_shot: Mutex::new(HashMap::new()),
            sticky: Mutex::new(HashMap::new()),
            hung: Mutex::new(HashSet::new()),
        }
    }

    /// Id handed out by the next `create_host`
    pub(crate) fn with_next_id(self, id: &str) -> Self {
        *self.next_id.lock().unwrap() = id.to_string();
        self
    }

    pub(crate) fn with_host(self, host: Host) -> Self {
        self.hosts.lock().unwrap().insert(host.id.clone(), host);
        self
    }

    pub(crate) fn fail_next(&self, operation: &'static str, error: ApiError) {
        self.one_shot
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub(crate) fn fail_always(&self, operation: &'static str, error: ApiError) {
        self.sticky.lock().unwrap().insert(operation, error);
    }

    pub(crate) fn hang(&self, operation: &'static str) {
        self.hung.lock().unwrap().insert(operation);
    }

    pub(crate) fn recover(&self, operation: &'static str) {
        self.sticky.lock().unwrap().remove(operation);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    async fn record(&self, operation: &'static str, call: Call) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call);
        let hung = self.hung.lock().unwrap().contains(operation);
        if hung {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self
            .one_shot
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(|q| q.pop_front())
        {
            return Err(error);
        }
        match self.sticky.lock().unwrap().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

pub(crate) fn host(id: &str, status: HostStatus) -> Host {
    Host {
        id: id.to_string(),
        name: format!("host-{}", id),
        status: Some(status),
        display_name: None,
        custom_identifier: None,
    }
}

#[async_trait]
impl BackendApi for FakeApi {
    async fn find_host(&self, id: &str) -> Result<Host, ApiError> {
        self.record("find_host", Call::FindHost(id.to_string())).await?;
        self.hosts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::from_status(404, "host not found"))
    }

    async fn find_hosts(
        &self,
        custom_identifier: &str,
        statuses: &[HostStatus],
    ) -> Result<Vec<Host>, ApiError> {
        self.record(
            "find_hosts",
            Call::FindHosts(custom_identifier.to_string(), statuses.to_vec()),
        )
        .await?;
        let mut hosts: Vec<Host> = self
            .hosts
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.custom_identifier.as_deref() == Some(custom_identifier))
            .filter(|h| h.status.map_or(false, |s| statuses.contains(&s)))
            .cloned()
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hosts)
    }

    async fn create_host(&self, params: &HostParams) -> Result<String, ApiError> {
        self.record("create_host", Call::CreateHost(params.clone())).await?;
        let id = self.next_id.lock().unwrap().clone();
        let host = Host {
            id: id.clone(),
            name: params.name.clone(),
            status: Some(HostStatus::Working),
            display_name: params.display_name.clone(),
            custom_identifier: params.custom_identifier.clone(),
        };
        self.hosts.lock().unwrap().insert(id.clone(), host);
        Ok(id)
    }

    async fn update_host(&self, id: &str, params: &HostParams) -> Result<(), ApiError> {
        self.record("update_host", Call::UpdateHost(id.to_string(), params.clone()))
            .await
    }

    async fn update_host_status(&self, id: &str, status: HostStatus) -> Result<(), ApiError> {
        self.record(
            "update_host_status",
            Call::UpdateHostStatus(id.to_string(), status),
        )
        .await?;
        if let Some(host) = self.hosts.lock().unwrap().get_mut(id) {
            host.status = Some(status);
        }
        Ok(())
    }

    async fn retire_host(&self, id: &str) -> Result<(), ApiError> {
        self.record("retire_host", Call::RetireHost(id.to_string())).await
    }

    async fn post_metric_values(&self, values: &[HostMetricValue]) -> Result<(), ApiError> {
        self.record("post_metric_values", Call::PostMetricValues(values.to_vec()))
            .await
    }

    async fn post_graph_defs(&self, defs: &[GraphDef]) -> Result<(), ApiError> {
        self.record("post_graph_defs", Call::PostGraphDefs(defs.to_vec())).await
    }

    async fn post_check_reports(&self, reports: &[CheckReport]) -> Result<(), ApiError> {
        self.record("post_check_reports", Call::PostCheckReports(reports.to_vec()))
            .await
    }
}
