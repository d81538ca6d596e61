use std::sync::Arc;

use sftp_core::{ActivationConfig, DeactivationConfig};
use sftp_infra::Backends;
use tokio::sync::Mutex;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub backends: Backends,
    pub activation: Arc<ActivationConfig>,
    pub deactivation: Arc<DeactivationConfig>,
    pub config: AppConfig,
    /// Held for the duration of a procedure so triggers never overlap.
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        backends: Backends,
        activation: ActivationConfig,
        deactivation: DeactivationConfig,
        config: AppConfig,
    ) -> Self {
        Self {
            backends,
            activation: Arc::new(activation),
            deactivation: Arc::new(deactivation),
            config,
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}
