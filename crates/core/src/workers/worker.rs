use anyhow::Result;
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};
use tracing::warn;

/// Single-consumer task owning its state exclusively.
///
/// Producers talk to a worker only through its command channel; timers are
/// expressed as the next deadline the worker wants to be woken at.
pub trait Worker: Send + Sized + 'static {
    const NAME: &'static str;
    type Command: Send + 'static;

    fn next_deadline(&self) -> Option<Instant>;
    async fn handle(&mut self, command: Self::Command) -> Result<()>;
    async fn on_deadline(&mut self) -> Result<()>;

    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Self::Command>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let deadline = self.next_deadline();
            let step = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = sleep_until(deadline) => self.on_deadline().await,
            };
            if let Err(e) = step {
                warn!(worker = Self::NAME, error = %e, "Worker step failed");
            }
        }

        // Commands sent before shutdown still get handled.
        while let Ok(command) = commands.try_recv() {
            if let Err(e) = self.handle(command).await {
                warn!(worker = Self::NAME, error = %e, "Worker step failed during shutdown");
            }
        }
        if let Err(e) = self.on_shutdown().await {
            warn!(worker = Self::NAME, error = %e, "Worker shutdown failed");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
