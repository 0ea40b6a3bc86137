//! The auxiliary service that runs alongside a bootstrap.
//!
//! The orchestrator binds the listener before anything else happens, so the
//! service accepts connections (the kernel queues them) by the time the
//! engine starts. The default implementation serves the seed scratch files
//! as a cloud-init NoCloud-net data source.

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vmstrap_fs as fs;

use crate::seed::{META_DATA_FILE, USER_DATA_FILE};

pub const DEFAULT_METADATA_PORT: u16 = 1234;

const VENDOR_DATA_FILE: &str = "vendor-data";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("failed to bind metadata service on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata service failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("metadata service task failed: {0}")]
    Join(#[from] JoinError),
}

/// Something that answers requests on an already-bound listener until
/// `shutdown` is cancelled.
#[async_trait]
pub trait MetadataService: Send + Sync + 'static {
    async fn serve(
        &self,
        listener: TcpListener,
        content_dir: PathBuf,
        shutdown: CancellationToken,
    ) -> Result<(), MetadataError>;
}

/// Serves `user-data`, `meta-data` and an empty `vendor-data` from a directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudInitServer;

#[async_trait]
impl MetadataService for CloudInitServer {
    async fn serve(
        &self,
        listener: TcpListener,
        content_dir: PathBuf,
        shutdown: CancellationToken,
    ) -> Result<(), MetadataError> {
        let router = Router::new()
            .route("/{file}", get(serve_file))
            .with_state(Arc::new(content_dir));

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(MetadataError::Serve)
    }
}

async fn serve_file(State(dir): State<Arc<PathBuf>>, UrlPath(file): UrlPath<String>) -> Response {
    match file.as_str() {
        USER_DATA_FILE | META_DATA_FILE => {}
        VENDOR_DATA_FILE => return String::new().into_response(),
        _ => return StatusCode::NOT_FOUND.into_response(),
    }

    debug!("serving {file}");

    match fs::read_file_to_string(dir.join(&file)).await {
        Ok(contents) => contents.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// A running metadata service.
pub struct MetadataHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), MetadataError>>,
}

impl MetadataHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Ask the service to stop and wait for it.
    pub async fn stop(self) -> Result<(), MetadataError> {
        self.shutdown.cancel();
        self.task.await?
    }
}

/// Bind on loopback and start `service` in the background.
///
/// Returns once the listener is bound. Port 0 picks a free port.
pub async fn start(
    service: Arc<dyn MetadataService>,
    port: u16,
    content_dir: PathBuf,
) -> Result<MetadataHandle, MetadataError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .map_err(|source| MetadataError::Bind { port, source })?;
    let addr = listener
        .local_addr()
        .map_err(|source| MetadataError::Bind { port, source })?;

    info!("metadata service listening on http://{addr}");

    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { service.serve(listener, content_dir, shutdown).await }
    });

    Ok(MetadataHandle {
        addr,
        shutdown,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn serves_seed_files_until_stopped() {
        let dir = TempDir::new().unwrap();
        fs::write_file(dir.path().join("user-data"), b"#cloud-config\n")
            .await
            .unwrap();
        fs::write_file(dir.path().join("meta-data"), b"")
            .await
            .unwrap();

        let handle = start(Arc::new(CloudInitServer), 0, dir.path().to_owned())
            .await
            .unwrap();
        let base = format!("http://{}", handle.local_addr());

        let user_data = reqwest::get(format!("{base}/user-data"))
            .await
            .unwrap();
        assert_eq!(user_data.status(), reqwest::StatusCode::OK);
        assert_eq!(user_data.text().await.unwrap(), "#cloud-config\n");

        let vendor_data = reqwest::get(format!("{base}/vendor-data"))
            .await
            .unwrap();
        assert_eq!(vendor_data.status(), reqwest::StatusCode::OK);
        assert_eq!(vendor_data.text().await.unwrap(), "");

        let unknown = reqwest::get(format!("{base}/gen_iso.sh")).await.unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

        handle.stop().await.unwrap();
        assert!(reqwest::get(format!("{base}/user-data")).await.is_err());
    }

    #[tokio::test]
    async fn port_in_use_is_a_bind_error() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = start(Arc::new(CloudInitServer), port, PathBuf::from("."))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MetadataError::Bind { port: p, .. } if p == port));
    }
}
