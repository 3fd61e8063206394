use relay::RelayContext;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) relay: RelayContext,
    /// Parent of every per-request token; cancelled once on shutdown.
    pub(crate) shutdown: CancellationToken,
}
