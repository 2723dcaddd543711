use std::sync::Arc;

use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::realtime::EventDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    pub dispatcher: Arc<EventDispatcher>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let connection_manager = Arc::new(ConnectionManager::new());
        let dispatcher = Arc::new(EventDispatcher::new(connection_manager.clone()));

        Self {
            settings: Arc::new(settings),
            connection_manager,
            dispatcher,
        }
    }
}
