use std::{sync::Arc, time::Duration};

use tokio::sync::OnceCell;
use tracing::warn;

use crate::{config::AppConfig, utils::soffice::Soffice, workspace::WorkspaceRegistry};

const VERSION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    workspaces: WorkspaceRegistry,
    soffice: Soffice,
    converter_version: Arc<OnceCell<String>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let workspaces = WorkspaceRegistry::new(&config.workspace_root);
        let soffice = Soffice::new(&config.soffice_bin);

        Self {
            config: Arc::new(config),
            workspaces,
            soffice,
            converter_version: Arc::new(OnceCell::new()),
        }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    pub fn workspaces(&self) -> &WorkspaceRegistry {
        &self.workspaces
    }

    pub fn soffice(&self) -> &Soffice {
        &self.soffice
    }

    /// LibreOffice version banner, queried once per process.
    pub async fn converter_version(&self) -> &str {
        self.converter_version
            .get_or_init(|| async {
                match self.soffice.version(VERSION_TIMEOUT).await {
                    Ok(version) if !version.is_empty() => version,
                    Ok(_) => "LibreOffice (unknown version)".to_string(),
                    Err(err) => {
                        warn!(?err, binary = %self.soffice.binary().display(), "failed to query LibreOffice version");
                        "LibreOffice (unavailable)".to_string()
                    }
                }
            })
            .await
    }
}
