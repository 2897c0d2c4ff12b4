// Background processor
// Periodic session expiry and change detection for reloadable applications

use super::{display_path, BackgroundTask, Context};
use std::sync::Weak;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl Context {
    /// Spawn the periodic task. Does nothing if the delay is zero or a task is already running.
    pub(crate) fn start_background_processor(&self) {
        let delay = self.background_processor_delay();
        if delay.is_zero() {
            return;
        }
        let mut slot = self.background.lock();
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let context = self.weak();
        let path = display_path(self.path());
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(delay);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if !background_process(&context) {
                            break;
                        }
                    }
                }
            }
            debug!(context = %path, "Background processor exited");
        });

        *slot = Some(BackgroundTask { cancel, handle });
        debug!(context = %display_path(self.path()), delay_ms = delay.as_millis() as u64, "Background processor started");
    }

    pub(crate) async fn stop_background_processor(&self) {
        let task = self.background.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(context = %display_path(self.path()), error = %e, "Background processor ended abnormally");
            }
        }
    }

    /// One pass of periodic work: expire idle sessions, then check for changed classes
    pub fn background_process(&self) {
        if !self.is_available() {
            return;
        }
        if let Some(manager) = self.manager() {
            let expired = manager.process_expires(&self.session_listeners());
            if expired > 0 {
                debug!(context = %display_path(self.path()), expired, "Expired idle sessions");
            }
        }

        if self.is_reloadable() && !self.is_paused() && self.loader().is_some_and(|l| l.modified()) {
            let Some(context) = self.arc() else {
                return;
            };
            info!(context = %display_path(self.path()), "Change detected, reloading context");
            // Reload stops this task, so it must run on its own
            tokio::spawn(async move {
                if let Err(e) = context.reload().await {
                    warn!(context = %display_path(context.path()), error = %e, "Reload failed");
                }
            });
        }
    }
}

/// Returns `false` once the context is gone
fn background_process(context: &Weak<Context>) -> bool {
    match context.upgrade() {
        Some(context) => {
            context.background_process();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use crate::lifecycle::{LifecycleEvent, LifecycleListener};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Configured;

    #[async_trait]
    impl LifecycleListener for Configured {
        async fn lifecycle_event(&self, context: &Context, event: LifecycleEvent) -> Result<(), LifecycleError> {
            if event == LifecycleEvent::ConfigureStart {
                context.set_configured(true);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_background_processor_expires_sessions() {
        let context = Context::new("/app");
        context.add_lifecycle_listener(std::sync::Arc::new(Configured));
        context.set_background_processor_delay(Duration::from_millis(20));
        context.start().await.unwrap();

        let manager = context.manager().unwrap();
        let mut req = crate::http::Request::get("/app/");
        let session = context.session(&mut req, true).unwrap();
        session.set_max_inactive_secs(1);
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert_eq!(manager.active_sessions(), 0);
        context.stop().await.unwrap();
        assert!(context.background.lock().is_none());
    }
}
