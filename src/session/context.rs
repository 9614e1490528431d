use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    audio::StreamResolver, configs::Config, events::EventBus, gateway::Gateway,
    storage::StationStore,
};

/// Collaborators shared by the supervisor and every session.
pub struct Context {
    pub config: Arc<Config>,
    pub resolver: Arc<dyn StreamResolver>,
    pub store: Arc<dyn StationStore>,
    pub bus: Arc<dyn EventBus>,
    gateway: RwLock<Option<Arc<dyn Gateway>>>,
}

impl Context {
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<dyn StreamResolver>,
        store: Arc<dyn StationStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            config,
            resolver,
            store,
            bus,
            gateway: RwLock::new(None),
        }
    }

    /// The current gateway connection, if one is up.
    pub fn gateway(&self) -> Option<Arc<dyn Gateway>> {
        self.gateway.read().clone()
    }

    /// Swaps the gateway connection. Reserved for the supervisor.
    pub(crate) fn replace_gateway(
        &self,
        gateway: Option<Arc<dyn Gateway>>,
    ) -> Option<Arc<dyn Gateway>> {
        std::mem::replace(&mut *self.gateway.write(), gateway)
    }
}
