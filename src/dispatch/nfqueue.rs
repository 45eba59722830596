//! NFQUEUE runner (Linux)
//!
//! One blocking worker thread per queue number. Each worker receives a
//! packet, asks the [`PacketHandler`] for a verdict and hands it back to the
//! kernel, setting the mark when the verdict carries one.
//!
//! Workers check the shared stop flag between packets. Installing the
//! iptables rules that feed the queues is left to the operator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nfq::Queue;
use tracing::{error, info, warn};

use super::{ether_type_for, PacketHandler, Verdict};
use crate::error::QueueError;

/// Delay before retrying after a receive error
const RECV_RETRY_DELAY: Duration = Duration::from_millis(10);

/// A worker bound to one queue number
pub struct QueueWorker<H> {
    queue_num: u16,
    handler: Arc<H>,
    stop: Arc<AtomicBool>,
    handled: Arc<AtomicU64>,
}

impl<H: PacketHandler + 'static> QueueWorker<H> {
    /// Create a worker; nothing is opened until [`run`](Self::run)
    pub fn new(queue_num: u16, handler: Arc<H>, stop: Arc<AtomicBool>) -> Self {
        Self {
            queue_num,
            handler,
            stop,
            handled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of packets given a verdict by this worker
    #[must_use]
    pub fn handled(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.handled)
    }

    /// Open and bind the queue, then process packets until stopped
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the queue cannot be opened or bound.
    pub fn run(self) -> Result<(), QueueError> {
        let mut queue = Queue::open().map_err(|e| QueueError::Open(e.to_string()))?;
        queue
            .bind(self.queue_num)
            .map_err(|e| QueueError::bind(self.queue_num, e.to_string()))?;

        info!(queue = self.queue_num, "queue bound");

        while !self.stop.load(Ordering::Relaxed) {
            let mut msg = match queue.recv() {
                Ok(msg) => msg,
                Err(e) => {
                    if !self.stop.load(Ordering::Relaxed) {
                        let err = QueueError::recv(self.queue_num, e.to_string());
                        warn!(error = %err, "queue receive failed");
                    }
                    thread::sleep(RECV_RETRY_DELAY);
                    continue;
                }
            };

            let payload = msg.get_payload();
            let proto = ether_type_for(msg.get_hw_protocol(), payload);
            let verdict = self.handler.handle_queued(proto, payload, msg.get_nfmark());

            match verdict {
                Verdict::Accept { mark } => {
                    if let Some(mark) = mark {
                        msg.set_nfmark(mark);
                    }
                    msg.set_verdict(nfq::Verdict::Accept);
                }
                Verdict::Drop => msg.set_verdict(nfq::Verdict::Drop),
            }

            if let Err(e) = queue.verdict(msg) {
                let err = QueueError::verdict(self.queue_num, e.to_string());
                warn!(error = %err, "verdict not delivered");
            }
            self.handled.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            queue = self.queue_num,
            packets = self.handled.load(Ordering::Relaxed),
            "queue worker stopped"
        );
        Ok(())
    }

    /// Run on a dedicated, named thread
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        let queue_num = self.queue_num;
        let stop = Arc::clone(&self.stop);
        thread::Builder::new()
            .name(format!("nfq-{queue_num}"))
            .spawn(move || {
                if let Err(e) = self.run() {
                    error!(queue = queue_num, error = %e, "queue worker failed");
                    stop.store(true, Ordering::Relaxed);
                }
            })
    }
}
