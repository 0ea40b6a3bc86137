use std::sync::Arc;
use thiserror::Error;
use vmstrap_cmd::{CommandRunner, SystemRunner};
use vmstrap_http::{HttpClient, HttpError};

use crate::{
    metadata::{CloudInitServer, MetadataService},
    paths::Paths,
    provision::{DiskAllocator, ImageFetcher, QemuImg},
};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Everything a run touches outside of its own memory.
#[derive(Clone)]
pub struct Context {
    paths: Paths,
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn ImageFetcher>,
    allocator: Arc<dyn DiskAllocator>,
    metadata: Arc<dyn MetadataService>,
}

impl Context {
    pub fn new(paths: Paths) -> Result<Self, ContextError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Ok(Self {
            paths,
            fetcher: Arc::new(HttpClient::new()?),
            allocator: Arc::new(QemuImg::new(runner.clone())),
            metadata: Arc::new(CloudInitServer),
            runner,
        })
    }

    pub fn from_parts(
        paths: Paths,
        runner: Arc<dyn CommandRunner>,
        fetcher: Arc<dyn ImageFetcher>,
        allocator: Arc<dyn DiskAllocator>,
        metadata: Arc<dyn MetadataService>,
    ) -> Self {
        Self {
            paths,
            runner,
            fetcher,
            allocator,
            metadata,
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn fetcher(&self) -> &dyn ImageFetcher {
        self.fetcher.as_ref()
    }

    pub fn allocator(&self) -> &dyn DiskAllocator {
        self.allocator.as_ref()
    }

    pub fn metadata(&self) -> Arc<dyn MetadataService> {
        self.metadata.clone()
    }
}
