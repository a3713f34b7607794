//! Transfer worker thread
//!
//! Backends that cannot finish a transfer inside `submit_*` hand it to a
//! [`TransferWorker`]. The worker owns a dedicated thread and talks to
//! submitters over an async channel, so submission never blocks.
//!
//! Scheduling: transfers are queued per endpoint. Within one endpoint they run
//! in submission order; endpoints with work take turns, one transfer each.
//! Cancelling an endpoint completes its queued transfers with
//! [`UsbError::Cancelled`]. A transfer that is already executing finishes
//! normally.

use crate::status::UsbError;
use crate::transfer::TransferMessage;
use async_channel::{Receiver, Sender, TrySendError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Executes one transfer on behalf of the worker
pub trait TransferHandler: Send + Sync + 'static {
    /// Move the transfer's data and return the number of bytes transferred
    ///
    /// The worker completes the transfer with the returned count, or with the
    /// error's code.
    fn handle(&self, transfer: &mut TransferMessage) -> Result<usize, UsbError>;
}

/// Stalls every transfer, like a device with no function behind it
#[derive(Debug, Default, Clone, Copy)]
pub struct StallHandler;

impl TransferHandler for StallHandler {
    fn handle(&self, _transfer: &mut TransferMessage) -> Result<usize, UsbError> {
        Err(UsbError::Pipe)
    }
}

enum WorkerCommand {
    Submit(TransferMessage),
    Cancel(u8),
    Shutdown,
}

/// Handle to a running transfer worker
///
/// Dropping the handle shuts the worker down and waits for it; transfers still
/// queued at that point complete as cancelled.
pub struct TransferWorker {
    tx: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl TransferWorker {
    /// Spawn a worker thread driving `handler`
    pub fn spawn(handler: Arc<dyn TransferHandler>) -> Self {
        let (tx, rx) = async_channel::unbounded();

        let thread = std::thread::Builder::new()
            .name("usb-worker".to_string())
            .spawn(move || WorkerThread::new(rx, handler).run())
            .expect("Failed to spawn USB worker thread");

        Self {
            tx,
            thread: Some(thread),
        }
    }

    /// Queue a transfer
    ///
    /// Fails, rejecting the transfer, only once the worker has stopped.
    pub fn submit(&self, transfer: TransferMessage) -> Result<(), UsbError> {
        match self.tx.try_send(WorkerCommand::Submit(transfer)) {
            Ok(()) => Ok(()),
            Err(e) => match e.into_inner() {
                WorkerCommand::Submit(transfer) => {
                    warn!("Transfer worker stopped, rejecting {:?}", transfer.request());
                    transfer.reject(UsbError::NoDevice)
                }
                _ => Err(UsbError::NoDevice),
            },
        }
    }

    /// Cancel the queued transfers of `endpoint`
    ///
    /// Completions happen on the worker thread, possibly after this returns.
    pub fn cancel(&self, endpoint: u8) -> Result<(), UsbError> {
        self.tx
            .try_send(WorkerCommand::Cancel(endpoint))
            .map_err(|_: TrySendError<WorkerCommand>| UsbError::NoDevice)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stop the worker, cancelling whatever is still queued
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let _ = self.tx.try_send(WorkerCommand::Shutdown);
        if thread.join().is_err() {
            error!("USB worker thread panicked");
        }
    }
}

impl Drop for TransferWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the worker thread
struct WorkerThread {
    rx: Receiver<WorkerCommand>,
    handler: Arc<dyn TransferHandler>,
    queues: HashMap<u8, VecDeque<TransferMessage>>,
    /// Endpoints with queued work, in turn order
    ready: VecDeque<u8>,
}

impl WorkerThread {
    fn new(rx: Receiver<WorkerCommand>, handler: Arc<dyn TransferHandler>) -> Self {
        Self {
            rx,
            handler,
            queues: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    fn run(mut self) {
        info!("USB worker thread started");

        'outer: loop {
            if self.ready.is_empty() {
                match self.rx.recv_blocking() {
                    Ok(cmd) => {
                        if !self.apply(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            // Cancellations that arrived meanwhile take effect before the next job
            while let Ok(cmd) = self.rx.try_recv() {
                if !self.apply(cmd) {
                    break 'outer;
                }
            }

            if let Some(transfer) = self.next_transfer() {
                self.execute(transfer);
            }
        }

        self.cancel_remaining();
        info!("USB worker thread stopped");
    }

    /// Apply a command; returns false on shutdown
    fn apply(&mut self, cmd: WorkerCommand) -> bool {
        match cmd {
            WorkerCommand::Submit(transfer) => {
                self.enqueue(transfer);
                true
            }
            WorkerCommand::Cancel(endpoint) => {
                self.cancel_endpoint(endpoint);
                true
            }
            WorkerCommand::Shutdown => {
                info!("USB worker shutting down");
                false
            }
        }
    }

    fn enqueue(&mut self, transfer: TransferMessage) {
        let endpoint = transfer.endpoint();
        debug!(
            "Queued {:?} transfer {:?} on endpoint {:#04x}",
            transfer.kind(),
            transfer.request(),
            endpoint
        );

        let queue = self.queues.entry(endpoint).or_default();
        if queue.is_empty() {
            self.ready.push_back(endpoint);
        }
        queue.push_back(transfer);
    }

    fn next_transfer(&mut self) -> Option<TransferMessage> {
        let endpoint = self.ready.pop_front()?;
        let queue = self.queues.get_mut(&endpoint)?;
        let transfer = queue.pop_front();

        if queue.is_empty() {
            self.queues.remove(&endpoint);
        } else {
            self.ready.push_back(endpoint);
        }
        transfer
    }

    fn execute(&self, mut transfer: TransferMessage) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handler.handle(&mut transfer)
        }));

        let status = match result {
            Ok(Ok(len)) => i32::try_from(len).unwrap_or(i32::MAX),
            Ok(Err(e)) => {
                debug!("Transfer {:?} failed: {}", transfer.request(), e);
                e.code()
            }
            Err(_) => {
                error!("Panic in transfer handler for {:?}", transfer.request());
                UsbError::Other.code()
            }
        };
        transfer.complete(status);
    }

    fn cancel_endpoint(&mut self, endpoint: u8) {
        self.ready.retain(|&queued| queued != endpoint);
        let Some(queue) = self.queues.remove(&endpoint) else {
            debug!("Cancel on idle endpoint {:#04x}", endpoint);
            return;
        };

        debug!(
            "Cancelling {} transfers on endpoint {:#04x}",
            queue.len(),
            endpoint
        );
        for transfer in queue {
            transfer.complete(UsbError::Cancelled.code());
        }
    }

    fn cancel_remaining(&mut self) {
        // Refuse new commands, then flush what already arrived
        self.rx.close();
        while let Ok(cmd) = self.rx.try_recv() {
            if let WorkerCommand::Submit(transfer) = cmd {
                self.enqueue(transfer);
            }
        }

        let endpoints: Vec<u8> = self.ready.iter().copied().collect();
        for endpoint in endpoints {
            self.cancel_endpoint(endpoint);
        }
    }
}
