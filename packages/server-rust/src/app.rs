//! Application: runs a set of transport servers as one unit.
//!
//! Every server's `start` runs on its own task. The application returns when
//! the shutdown trigger fires or any server exits, after stopping every
//! server and waiting for all of them to finish.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use meridian_core::TransportKind;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::TransportError;
use crate::transport::Server;

/// Owns the transport servers of one process.
pub struct App {
    config: AppConfig,
    servers: Vec<Arc<dyn Server>>,
}

impl App {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            servers: Vec::new(),
        }
    }

    /// Adds a server. Pass an `Arc` to keep a handle to it.
    pub fn append<S: Server + 'static>(&mut self, server: S) -> &mut Self {
        self.servers.push(Arc::new(server));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Runs until SIGINT/SIGTERM (when `handle_signals` is set) or until a
    /// server exits.
    ///
    /// # Errors
    ///
    /// Same as [`App::run_until`].
    pub async fn run(&self) -> Result<(), TransportError> {
        if self.config.handle_signals {
            self.run_until(shutdown_signal()).await
        } else {
            self.run_until(std::future::pending()).await
        }
    }

    /// Runs until `shutdown` completes or a server exits.
    ///
    /// # Errors
    ///
    /// Returns the first server failure (bind, accept loop, stop, or a
    /// panicked server task). The remaining servers are stopped first.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        if self.servers.is_empty() {
            warn!("application has no servers");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for server in &self.servers {
            let server = Arc::clone(server);
            tasks.spawn(async move { (server.kind(), server.start().await) });
        }
        info!(servers = self.servers.len(), "application started");

        let mut first_error = None;
        tokio::select! {
            () = shutdown => info!("shutdown requested"),
            Some(joined) = tasks.join_next() => {
                if let Err(err) = server_exit(joined) {
                    first_error = Some(err);
                }
            }
        }

        for result in join_all(self.servers.iter().map(|server| server.stop())).await {
            if let Err(err) = result {
                warn!(error = %err, "server stop failed");
                first_error.get_or_insert(err);
            }
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = server_exit(joined) {
                first_error.get_or_insert(err);
            }
        }
        info!("application stopped");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<TransportKind> = self.servers.iter().map(|server| server.kind()).collect();
        f.debug_struct("App")
            .field("config", &self.config)
            .field("servers", &kinds)
            .finish()
    }
}

fn server_exit(
    joined: Result<(TransportKind, Result<(), TransportError>), JoinError>,
) -> Result<(), TransportError> {
    match joined {
        Ok((kind, Ok(()))) => {
            info!(server = %kind, "server exited");
            Ok(())
        }
        Ok((kind, Err(err))) => {
            error!(server = %kind, error = %err, "server failed");
            Err(err)
        }
        Err(err) => {
            error!(error = %err, "server task failed");
            Err(TransportError::Join(err))
        }
    }
}

/// Completes on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
