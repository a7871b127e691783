use tracing::{info, warn};

/// Resolves on the first termination signal.
pub async fn wait_for_shutdown() {
    ShutdownSignals::install().wait().await;
}

/// Termination signal handlers, registered up front so no signal delivered
/// after `install` is missed.
#[cfg(unix)]
pub struct ShutdownSignals {
    interrupt: Option<tokio::signal::unix::Signal>,
    terminate: Option<tokio::signal::unix::Signal>,
    quit: Option<tokio::signal::unix::Signal>,
    hangup: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl ShutdownSignals {
    pub fn install() -> Self {
        use tokio::signal::unix::SignalKind;

        Self {
            interrupt: listen("SIGINT", SignalKind::interrupt()),
            terminate: listen("SIGTERM", SignalKind::terminate()),
            quit: listen("SIGQUIT", SignalKind::quit()),
            hangup: listen("SIGHUP", SignalKind::hangup()),
        }
    }

    /// Wait for any of the signals and return its name. Handlers are dropped
    /// when this returns.
    pub async fn wait(mut self) -> &'static str {
        if self.interrupt.is_none()
            && self.terminate.is_none()
            && self.quit.is_none()
            && self.hangup.is_none()
        {
            ctrl_c().await;
            return "SIGINT";
        }

        let name = tokio::select! {
            _ = recv(&mut self.interrupt) => "SIGINT",
            _ = recv(&mut self.terminate) => "SIGTERM",
            _ = recv(&mut self.quit) => "SIGQUIT",
            _ = recv(&mut self.hangup) => "SIGHUP",
        };
        info!(signal = name, "Shutdown signal received");
        name
    }
}

#[cfg(unix)]
fn listen(
    name: &'static str,
    kind: tokio::signal::unix::SignalKind,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(signal = name, error = %e, "Failed to install signal handler");
            None
        }
    }
}

#[cfg(unix)]
async fn recv(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            if stream.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
pub struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> Self {
        ShutdownSignals
    }

    pub async fn wait(self) -> &'static str {
        ctrl_c().await;
        "SIGINT"
    }
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
    }
}
