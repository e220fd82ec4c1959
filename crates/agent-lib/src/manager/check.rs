use super::{Manager, Pipeline};
use crate::collector::CheckGenerator;
use crate::models::{CheckReport, CheckSource};
use crate::sync::{ApiError, BackendApi, Deliver};
use async_trait::async_trait;
use std::sync::Arc;

pub type CheckManager = Manager<CheckPipeline>;

/// Relays check reports, stamping each with its source host
pub struct CheckPipeline {
    api: Arc<dyn BackendApi>,
}

impl CheckPipeline {
    pub fn new(api: Arc<dyn BackendApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Deliver for CheckPipeline {
    type Item = CheckReport;
    const SUBSYSTEM: &'static str = "check";

    async fn deliver(&self, destination: &str, window: Vec<CheckReport>) -> Result<(), ApiError> {
        let reports: Vec<CheckReport> = window
            .into_iter()
            .map(|report| CheckReport {
                source: Some(CheckSource::host(destination)),
                ..report
            })
            .collect();
        self.api.post_check_reports(&reports).await
    }
}

impl Pipeline for CheckPipeline {
    type Generator = CheckGenerator;

    fn assemble(&self, outputs: Vec<CheckReport>) -> Vec<CheckReport> {
        outputs
    }
}
