//! Driver-level observers that turn a core delivery event into a log line.
//! Kept out of `da-core` so the core stays I/O-free; only the driver knows
//! about the output log file.

use std::sync::Arc;

use bytes::Bytes;

use da_common::log::LogWriter;
use da_common::ProcessId;
use da_core::fifo::FifoDeliverSink;
use da_core::pl::Notifyable;

/// Logs every first-time PL delivery as `d <sender> <seq>` — used by `pl`
/// mode, where there's no broadcast/FIFO layer above PL at all.
pub struct PlDeliveryLogger {
    log: Arc<LogWriter>,
}

impl PlDeliveryLogger {
    pub fn new(log: Arc<LogWriter>) -> Arc<Self> {
        Arc::new(PlDeliveryLogger { log })
    }
}

impl Notifyable for PlDeliveryLogger {
    fn notify(&self, from: ProcessId, seq: u32, _payload: Bytes) {
        self.log.log_delivery(from, seq);
    }
}

/// Logs every FIFO-ordered delivery as `d <author> <author_seq>`.
pub struct FifoDeliveryLogger {
    log: Arc<LogWriter>,
}

impl FifoDeliveryLogger {
    pub fn new(log: Arc<LogWriter>) -> Arc<Self> {
        Arc::new(FifoDeliveryLogger { log })
    }
}

impl FifoDeliverSink for FifoDeliveryLogger {
    fn on_fifo_deliver(&self, author: ProcessId, seq: u32, _payload: Bytes) {
        self.log.log_delivery(author, seq);
    }
}
