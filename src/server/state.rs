use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::connection_registry::ConnectionRegistry;
use crate::rooms::RoomManager;
use crate::router::EventRouter;
use crate::store::MessageStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub router: Arc<EventRouter>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn MessageStore>) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new(registry.clone()));
        let router = Arc::new(EventRouter::new(registry.clone(), rooms.clone(), store));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            registry,
            rooms,
            router,
            start_time: Instant::now(),
        }
    }
}
