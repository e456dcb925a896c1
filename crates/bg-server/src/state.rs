use std::sync::Arc;

use bg_core::services::SlotManager;

use crate::auth::ApiKeys;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SlotManager>,
    pub keys: Arc<ApiKeys>,
}

impl AppState {
    pub fn new(manager: Arc<SlotManager>, keys: ApiKeys) -> Self {
        Self {
            manager,
            keys: Arc::new(keys),
        }
    }
}
