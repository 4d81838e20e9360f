//! Ctrl-C handling.
//!
//! The merge loop is synchronous, so the signal is awaited on a small
//! current-thread tokio runtime living on its own thread. The first Ctrl-C
//! triggers the shared [`StopSignal`]; the loop notices it between passes.

use anyhow::{Context, Result};
use kintail_core::StopSignal;
use tracing::{debug, info};

/// Spawn the watcher thread and return the signal it triggers.
///
/// # Errors
///
/// Fails if the runtime or the thread cannot be created.
pub fn install() -> Result<StopSignal> {
    let stop = StopSignal::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    let handle = stop.clone();
    std::thread::Builder::new()
        .name("kt-interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("interrupt received, stopping");
                        handle.trigger();
                    }
                    Err(err) => debug!("ctrl-c handler unavailable: {err}"),
                }
            });
        })
        .context("Failed to spawn interrupt thread")?;

    Ok(stop)
}
