//! External shutdown triggers and the bridge into the stop signal.
//!
//! A [`ShutdownTrigger`] is whatever outside source may ask the client to
//! stop: OS signals for a process, or a [`CancellationToken`] owned by an
//! orchestrator. [`bridge`] runs next to the engine for one run and fires the
//! engine's [`StopSignal`] when the trigger goes off.
//!
//! ## Unix signals
//! [`OsSignals`] waits for SIGINT or SIGTERM. SIGQUIT keeps its default
//! core-dump behavior. On other platforms only ctrl-c is awaited.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::stop::StopSignal;

/// Source of an external shutdown request.
#[async_trait]
pub trait ShutdownTrigger: Send + Sync {
    /// Completes when shutdown is requested. `Err` means the trigger could
    /// not be installed and will never fire.
    async fn triggered(&self) -> std::io::Result<()>;
}

/// Process termination signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

#[async_trait]
impl ShutdownTrigger for OsSignals {
    #[cfg(unix)]
    async fn triggered(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv()  => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn triggered(&self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await
    }
}

#[async_trait]
impl ShutdownTrigger for CancellationToken {
    async fn triggered(&self) -> std::io::Result<()> {
        self.cancelled().await;
        Ok(())
    }
}

/// Wait for whichever comes first: the trigger or the stop signal. If the
/// trigger wins, fire the stop signal.
pub async fn bridge(trigger: &dyn ShutdownTrigger, stop: &StopSignal) {
    let triggered = tokio::select! {
        _ = stop.fired() => false,
        result = trigger.triggered() => match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("shutdown_trigger_unavailable: {}", e);
                stop.fired().await;
                false
            }
        },
    };

    if triggered {
        tracing::info!("shutdown_requested: external trigger");
        // The engine may have stopped in the meantime; either way it is stopped.
        let _ = stop.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Broken;

    #[async_trait]
    impl ShutdownTrigger for Broken {
        async fn triggered(&self) -> std::io::Result<()> {
            Err(std::io::Error::other("no signal support"))
        }
    }

    #[tokio::test]
    async fn test_trigger_fires_stop() {
        let token = CancellationToken::new();
        let stop = StopSignal::new();
        let task = {
            let token = token.clone();
            let stop = stop.clone();
            tokio::spawn(async move { bridge(&token, &stop).await })
        };

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(stop.is_fired());
    }

    #[tokio::test]
    async fn test_stop_first_ends_bridge_without_refiring() {
        let token = CancellationToken::new();
        let stop = StopSignal::new();
        stop.fire().unwrap();

        bridge(&token, &stop).await;
        assert!(!token.is_cancelled());
        assert!(matches!(stop.fire(), Err(crate::Error::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_both_ready_is_race_free() {
        let token = CancellationToken::new();
        let stop = StopSignal::new();
        token.cancel();
        stop.fire().unwrap();

        bridge(&token, &stop).await;
        assert!(stop.is_fired());
    }

    #[tokio::test]
    async fn test_broken_trigger_waits_for_stop() {
        let stop = StopSignal::new();
        let task = {
            let stop = stop.clone();
            tokio::spawn(async move { bridge(&Broken, &stop).await })
        };

        tokio::task::yield_now().await;
        assert!(!stop.is_fired());
        stop.fire().unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
