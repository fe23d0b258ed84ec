use log::warn;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Runs a callback on a fixed interval until stopped or until the callback asks to stop
#[derive(Debug)]
pub struct RepeatingTimer {
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl RepeatingTimer {
    pub fn new(interval: Duration) -> Self {
        RepeatingTimer {
            interval,
            handle: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking, restarting if already running.
    ///
    /// The first tick fires immediately. `tick` returns `false` to end the timer. Outside
    /// a tokio runtime nothing is started and `false` is returned.
    pub fn start<F>(&mut self, mut tick: F) -> bool
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot start timer without a tokio runtime: {}", e);
                return false;
            }
        };

        let period = self.interval;
        self.handle = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if !tick() {
                    break;
                }
            }
        }));
        true
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
