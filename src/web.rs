use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::authz::registry::PointRegistry;
use crate::errors::TollgateError;
use crate::settings::Settings;

pub async fn serve(settings: &Settings, registry: Arc<PointRegistry>) -> Result<(), TollgateError> {
    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|_| TollgateError::BadAddress(settings.listen_addr()))?;

    let router = crate::authz::web::router(registry).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Authorization decision API listening");
    axum::serve(listener, router).await?;
    Ok(())
}
