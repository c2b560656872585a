use std::sync::Arc;

use fileflip_core::{
    AdmissionController, Config, FailoverJobStore, FormatFamily, SanitizedConfig, WorkerPool,
};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<FailoverJobStore>,
    admission: AdmissionController,
    pool: Arc<WorkerPool>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<FailoverJobStore>,
        admission: AdmissionController,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            config,
            store,
            admission,
            pool,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[allow(dead_code)]
    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn store(&self) -> &Arc<FailoverJobStore> {
        &self.store
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Upload size cap for a source family.
    pub fn upload_limit_bytes(&self, family: FormatFamily) -> u64 {
        let limits = &self.config.limits;
        match family {
            FormatFamily::Document => limits.document_max_bytes,
            FormatFamily::Spreadsheet => limits.spreadsheet_max_bytes,
            FormatFamily::Image | FormatFamily::Audio | FormatFamily::Video => {
                limits.media_max_bytes
            }
            FormatFamily::Archive => limits.archive_max_bytes,
        }
    }
}
