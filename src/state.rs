use crate::config::config::{AttentionMode, Config};
use crate::repositories::output_repository::OutputRepository;
use crate::services::generation_queue::{GenerationQueue, GenerationQueueState};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Settings resolved at startup from the configuration and the detected
/// hardware.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub profile: u8,
    pub attention: AttentionMode,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runtime: RuntimeSettings,
    pub queue: GenerationQueueState,
    pub worker_notify: Arc<Notify>,
    pub outputs: OutputRepository,
}

impl AppState {
    pub fn new(config: Config, runtime: RuntimeSettings) -> Self {
        let queue = Arc::new(Mutex::new(GenerationQueue::new(
            config.server.completed_history,
        )));
        let outputs = OutputRepository::new(config.server.save_path.clone());
        Self {
            config: Arc::new(config),
            runtime,
            queue,
            worker_notify: Arc::new(Notify::new()),
            outputs,
        }
    }
}
