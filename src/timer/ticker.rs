use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Owns the background task that delivers one-second ticks.
///
/// The callback returns `false` to stop the loop from the inside.
#[derive(Default)]
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Starts ticking, replacing any previous loop.
    pub fn spawn<F, Fut>(&mut self, tick_interval: Duration, mut on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        self.stop();

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + tick_interval, tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        log_info!("question ticker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if !on_tick().await {
                            break;
                        }
                    }
                }
            }
        });

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.handle = None;
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn stops_when_callback_declines() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();

        let mut ticker = Ticker::new();
        ticker.spawn(Duration::from_millis(5), move || {
            let seen = seen.clone();
            async move { seen.fetch_add(1, Ordering::SeqCst) + 1 < 3 }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!ticker.is_running());
    }

    #[tokio::test]
    async fn stop_cancels_the_loop() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();

        let mut ticker = Ticker::new();
        ticker.spawn(Duration::from_millis(5), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                true
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        ticker.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn stop_wins_over_overdue_ticks() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();

        let mut ticker = Ticker::new();
        ticker.spawn(Duration::from_millis(5), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(60)).await;
                true
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        ticker.stop();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
