//! Monitor trait and the driver loop.
//!
//! Each monitor runs on its own task at its own cadence; a slow or failing
//! monitor never blocks its siblings. A shutdown signal stops new checks
//! but lets the in-flight one finish.

use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// A named periodic task owned by the dispatcher.
#[async_trait]
pub trait Monitor: Send {
    fn name(&self) -> &'static str;
    fn check_every(&self) -> Duration;
    async fn check(&mut self) -> Result<()>;
}

pub struct Dispatcher {
    monitors: Vec<Box<dyn Monitor>>,
}

impl Dispatcher {
    pub fn new(monitors: Vec<Box<dyn Monitor>>) -> Self {
        Self { monitors }
    }

    /// Drive every monitor until the shutdown flag flips. Returns once all
    /// monitor tasks have wound down.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for monitor in self.monitors {
            handles.push(tokio::spawn(drive(monitor, shutdown.clone())));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!("Monitor task aborted: {err}");
            }
        }
        info!("Dispatcher stopped");
    }
}

async fn drive(mut monitor: Box<dyn Monitor>, mut shutdown: watch::Receiver<bool>) {
    info!("Starting monitor {}", monitor.name());
    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        // A failing check is this monitor's problem alone; the next poll
        // will see the same state and try again.
        if let Err(err) = monitor.check().await {
            error!("Monitor {} check failed: {err:#}", monitor.name());
        }
        debug!(
            "Monitor {} took {:.3}s",
            monitor.name(),
            started.elapsed().as_secs_f64()
        );

        tokio::select! {
            _ = tokio::time::sleep(monitor.check_every()) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Monitor {} stopped", monitor.name());
}
