use super::{Manager, Pipeline};
use crate::collector::SpecGenerator;
use crate::models::{CheckConfig, HostParams, HostSpec};
use crate::sync::{ApiError, BackendApi, Deliver};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

pub type SpecManager = Manager<SpecPipeline>;

/// Builds the host document from spec fragments and refreshes the host record
pub struct SpecPipeline {
    api: Arc<dyn BackendApi>,
    base: HostParams,
    checks: RwLock<Vec<CheckConfig>>,
    custom_identifier: RwLock<Option<String>>,
}

impl SpecPipeline {
    /// `base` carries the configured fields (name fallback, display name, memo, roles)
    pub fn new(api: Arc<dyn BackendApi>, base: HostParams) -> Self {
        let checks = base.checks.clone();
        let custom_identifier = base.custom_identifier.clone();
        Self {
            api,
            base,
            checks: RwLock::new(checks),
            custom_identifier: RwLock::new(custom_identifier),
        }
    }

    /// Merge spec fragments over the configured base document
    pub fn build_params(&self, specs: Vec<HostSpec>) -> HostParams {
        let mut params = self.base.clone();
        let mut hostname = None;

        for spec in specs {
            params.meta.extend(spec.meta);
            if hostname.is_none() {
                hostname = spec.hostname.filter(|h| !h.is_empty());
            }
        }
        if let Some(hostname) = hostname {
            params.name = hostname;
        }

        params.checks = self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        params.custom_identifier = self
            .custom_identifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        params
    }
}

#[async_trait]
impl Deliver for SpecPipeline {
    type Item = HostParams;
    const SUBSYSTEM: &'static str = "spec";

    async fn deliver(&self, destination: &str, window: Vec<HostParams>) -> Result<(), ApiError> {
        // Only the newest document matters
        match window.last() {
            Some(params) => self.api.update_host(destination, params).await,
            None => Ok(()),
        }
    }
}

impl Pipeline for SpecPipeline {
    type Generator = SpecGenerator;

    fn assemble(&self, outputs: Vec<HostSpec>) -> Vec<HostParams> {
        if outputs.is_empty() {
            return Vec::new();
        }
        vec![self.build_params(outputs)]
    }
}

impl Manager<SpecPipeline> {
    /// Collect the full host document right now
    pub async fn fetch(&self, cancel: &CancellationToken) -> anyhow::Result<HostParams> {
        let specs = self.collector().collect(cancel).await?;
        Ok(self.pipeline().build_params(specs))
    }

    /// Replace the check configurations attached to future documents
    pub fn set_checks(&self, checks: Vec<CheckConfig>) {
        *self
            .pipeline()
            .checks
            .write()
            .unwrap_or_else(PoisonError::into_inner) = checks;
    }

    pub fn set_custom_identifier(&self, custom_identifier: Option<String>) {
        *self
            .pipeline()
            .custom_identifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = custom_identifier;
    }
}
