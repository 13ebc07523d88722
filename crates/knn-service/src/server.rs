//! gRPC server setup with health check and reflection.

use std::net::SocketAddr;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::info;

use crate::node_service::KnnNodeServiceImpl;
use crate::pb::{knn_node_service_server::KnnNodeServiceServer, FILE_DESCRIPTOR_SET};

/// Run the gRPC server until the process exits.
pub async fn run_server(
    addr: SocketAddr,
    service: KnnNodeServiceImpl,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    run_server_with_shutdown(addr, service, std::future::pending()).await
}

/// Run the gRPC server with graceful shutdown support.
///
/// Accepts a shutdown signal future that, when resolved, triggers graceful
/// shutdown.
pub async fn run_server_with_shutdown<F>(
    addr: SocketAddr,
    service: KnnNodeServiceImpl,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Starting gRPC server on {}", addr);

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<KnnNodeServiceServer<KnnNodeServiceImpl>>()
        .await;

    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    info!("gRPC server ready on {}", addr);

    Server::builder()
        .add_service(health_service)
        .add_service(reflection_service)
        .add_service(KnnNodeServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal)
        .await?;

    info!("gRPC server shutdown complete");
    Ok(())
}
