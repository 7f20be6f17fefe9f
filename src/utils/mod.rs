/// Utility functions and helpers
use crate::config::LoggingConfig;
use std::future;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured level. Returns false if a
/// subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

/// Receiving side of the client's shutdown notification
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create a signal and the sender that triggers it
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (sender, receiver) = watch::channel(false);
        (sender, Self { receiver })
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown is triggered. Never resolves if the sender is dropped untriggered.
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                future::pending::<()>().await;
            }
        }
    }
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h1m1s");
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (sender, signal) = ShutdownSignal::channel();
        assert!(!signal.is_triggered());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.triggered().await })
        };
        sender.send(true).unwrap();

        waiter.await.unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_never_triggers() {
        let (sender, signal) = ShutdownSignal::channel();
        drop(sender);

        let waited = tokio::time::timeout(Duration::from_secs(60), signal.triggered()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
