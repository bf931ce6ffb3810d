use std::sync::Arc;

use crate::config::Config;
use crate::queue::QueueService;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub queue: Arc<QueueService>,
}
