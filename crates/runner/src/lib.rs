//! Runs the long-lived processes of a service and shuts them down together.
//!
//! Every app process gets a clone of one `CancellationToken`. The token is
//! cancelled on SIGINT/SIGTERM or when a process fails; closers run once all
//! processes have stopped, bounded by a timeout.
//!
//! ```no_run
//! use pcount_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Runner::new()
//!         .with_app_process("ticker", |ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer("connection", || async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await
//! }
//! ```

use anyhow::anyhow;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// An app process: takes the shared cancellation token, resolves when it stops
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

/// A cleanup function run after every app process has stopped
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

struct Named<T> {
    name: String,
    inner: T,
}

pub struct Runner {
    app_processes: Vec<Named<AppProcess>>,
    closers: Vec<Named<Closer>>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds; signal handling is on.
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    /// Add an app process. If it returns an error every other process is cancelled.
    pub fn with_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes.push(Named {
            name: name.into(),
            inner: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Add a closer. Closers run concurrently and a failing closer does not
    /// stop the others.
    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Named {
            name: name.into(),
            inner: Box::new(|| Box::pin(closer())),
        });
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally controlled token instead of a private one
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Do not install SIGINT/SIGTERM handlers; only the token stops the runner
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Run until a shutdown signal, cancellation, or the first process failure.
    ///
    /// Returns the first process error, if any. Closer failures and closer
    /// timeouts are logged but do not change the outcome.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for process in self.app_processes {
            let process_token = token.clone();
            let name = process.name;
            let run = process.inner;
            join_set.spawn(async move {
                debug!(process = %name, "starting app process");
                let result = run(process_token).await;
                (name, result)
            });
        }

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "app process completed");
                }
                Ok((name, Err(err))) => {
                    if token.is_cancelled() {
                        debug!(process = %name, error = %err, "app process stopped with error after shutdown");
                    } else {
                        error!(process = %name, error = ?err, "app process failed");
                        first_error = Some(err.context(format!("process {} failed", name)));
                        token.cancel();
                    }
                }
                Err(join_error) => {
                    error!(error = %join_error, "app process panicked");
                    if !token.is_cancelled() {
                        first_error = Some(anyhow!("app process panicked: {}", join_error));
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // let the remaining processes observe the cancellation before aborting them
        let drained = tokio::time::timeout(self.closer_timeout, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            error!(timeout = ?self.closer_timeout, "app processes did not stop in time, aborting");
            join_set.shutdown().await;
        }

        run_closers(self.closers, self.closer_timeout).await;

        match first_error {
            Some(err) => {
                error!(error = ?err, "application exiting with error");
                Err(err)
            }
            None => {
                info!("application exiting normally");
                Ok(())
            }
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT");
                ctrl_c_token.cancel();
            }
            Err(err) => error!(error = %err, "error setting up SIGINT handler"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
                token.cancel();
            }
            Err(err) => error!(error = %err, "error setting up SIGTERM handler"),
        }
    });
}

async fn run_closers(closers: Vec<Named<Closer>>, closer_timeout: Duration) {
    if closers.is_empty() {
        return;
    }
    info!(timeout = ?closer_timeout, count = closers.len(), "running closers");

    let mut closer_set = JoinSet::new();
    for closer in closers {
        let name = closer.name;
        let close = closer.inner;
        closer_set.spawn(async move { (name, close().await) });
    }

    let all_closed = tokio::time::timeout(closer_timeout, async {
        while let Some(joined) = closer_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(closer = %name, "closer completed"),
                Ok((name, Err(err))) => error!(closer = %name, error = ?err, "closer failed"),
                Err(join_error) => error!(error = %join_error, "closer panicked"),
            }
        }
    })
    .await;

    match all_closed {
        Ok(()) => info!("all closers completed"),
        Err(_) => {
            error!(timeout = ?closer_timeout, "closers timed out");
            closer_set.abort_all();
        }
    }
}
