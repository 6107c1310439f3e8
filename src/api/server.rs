use crate::api::routes;
use crate::core::ExecutionCoordinator;
use std::net::SocketAddr;
use tracing::info;

/// Starts and runs the HTTP server using Axum web framework
///
/// # Arguments
/// * `coordinator` - Execution coordinator serving every request
/// * `port` - Port number to listen on for incoming HTTP connections
///
/// # Returns
/// * `Result<(), std::io::Error>` - Ok when the server shuts down, Error if binding or serving fails
pub async fn launch_server(
    coordinator: ExecutionCoordinator,
    port: u16,
) -> Result<(), std::io::Error> {
    let app = routes::app(coordinator);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on {}", addr);
    axum::serve(listener, app).await
}
