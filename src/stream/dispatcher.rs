/// Outgoing half of a transaction stream
///
/// Requests are either sent at once or held back briefly so that several
/// small ones share a single batch on the wire. The caller picks per request.
use crate::error::{DriverError, DriverResult};
use crate::protocol::Request;
use std::mem;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Longest time a batched request waits before being flushed
    pub batch_window: Duration,
    /// Pending batch size that forces an early flush
    pub max_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(3),
            max_batch_size: 64,
        }
    }
}

#[derive(Debug)]
enum Command {
    Dispatch { request: Request, batch: bool },
    Close,
}

/// Handle to the dispatcher task of one stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    commands: mpsc::UnboundedSender<Command>,
}

impl RequestDispatcher {
    /// Spawn the dispatcher task writing into `sink`
    pub fn spawn(sink: mpsc::UnboundedSender<Vec<Request>>, config: DispatchConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(receiver, sink, config));
        Self { commands }
    }

    /// Send a request immediately, together with anything already pending
    pub fn dispatch(&self, request: Request) -> DriverResult<()> {
        self.send(Command::Dispatch { request, batch: false })
    }

    /// Queue a request for the next batch flush
    pub fn dispatch_batched(&self, request: Request) -> DriverResult<()> {
        self.send(Command::Dispatch { request, batch: true })
    }

    /// Flush what is pending and stop; later dispatches fail with `TransactionClosed`
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    fn send(&self, command: Command) -> DriverResult<()> {
        self.commands
            .send(command)
            .map_err(|_| DriverError::TransactionClosed)
    }
}

async fn run_dispatcher(
    mut commands: mpsc::UnboundedReceiver<Command>,
    sink: mpsc::UnboundedSender<Vec<Request>>,
    config: DispatchConfig,
) {
    let mut pending: Vec<Request> = Vec::new();
    let mut ticker = interval_at(Instant::now() + config.batch_window, config.batch_window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Dispatch { request, batch }) => {
                    pending.push(request);
                    if (!batch || pending.len() >= config.max_batch_size) && !flush(&sink, &mut pending) {
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    flush(&sink, &mut pending);
                    break;
                }
            },
            _ = ticker.tick(), if !pending.is_empty() => {
                if !flush(&sink, &mut pending) {
                    break;
                }
            }
        }
    }
    trace!("Request dispatcher stopped");
}

/// Returns false once the stream's request half is gone
fn flush(sink: &mpsc::UnboundedSender<Vec<Request>>, pending: &mut Vec<Request>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let batch = mem::take(pending);
    let size = batch.len();
    match sink.send(batch) {
        Ok(()) => {
            trace!("Flushed {} requests", size);
            true
        }
        Err(_) => {
            debug!("Request half of the stream is closed, dropped {} requests", size);
            false
        }
    }
}
