use std::sync::Arc;

use store::Store;

use crate::broadcast::Broadcaster;
use crate::coordinator::Coordinator;
use crate::forge::ForgeClient;
use crate::vault::Vault;

/// Shared handles injected into every handler. All members are cheap to
/// clone; none are process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub broadcaster: Broadcaster,
    pub vault: Arc<Vault>,
    pub coordinator: Coordinator,
    pub forge: Option<Arc<ForgeClient>>,
}
