//! HTTP surface for Stride: provider webhooks, mobile sync, pending-input
//! resolution, and the run retry affordance.

mod http;

pub use http::router;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use stride_ingress::{IngressService, SourceProvider};
use stride_orchestrator::PendingInputService;
use stride_store::MetadataStore;
use stride_types::ActivitySource;

/// Shared singletons, built once in the engine and cloned into handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<IngressService>,
    pub providers: Arc<HashMap<ActivitySource, Arc<dyn SourceProvider>>>,
    pub pending_inputs: Arc<PendingInputService>,
    pub store: Arc<dyn MetadataStore>,
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("stride-server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
