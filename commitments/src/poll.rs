use std::{fmt::Display, future::Future, time::Duration};

use tracing::{error, info};

/// Runs a cycle, waits a fixed interval and repeats until shutdown.
#[derive(Clone, Debug)]
pub struct Poller {
    interval: Duration,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Returns the number of completed cycles once `shutdown` resolves, or the first cycle error.
    ///
    /// `shutdown` is only observed between cycles: a running cycle always finishes.
    pub async fn run<F, Fut, T, E>(
        &self,
        mut cycle: F,
        shutdown: impl Future<Output = ()>,
    ) -> Result<usize, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        tokio::pin!(shutdown);
        let mut completed = 0;
        loop {
            if let Err(err) = cycle().await {
                error!(error = %err, cycle = completed + 1, "sync cycle failed");
                return Err(err);
            }
            completed += 1;

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(cycles = completed, "shutdown requested, stopping poll loop");
                    return Ok(completed);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
