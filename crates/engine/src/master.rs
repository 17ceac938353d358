// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seam to whatever carries messages to the master.
//!
//! Wire framing and master discovery are external concerns; the agent and
//! the status-update manager only need fire-and-forget enqueueing.
//! Delivery is unreliable by design — everything that must arrive is
//! retried at the protocol level (registration backoff, update
//! retransmits).

use dray_core::SlaveMessage;

/// Outbound channel to the current master, if any.
pub trait MasterLink: Send + Sync + 'static {
    /// Enqueue a message for the master. Best-effort: implementations
    /// drop (with a log line) when no master is connected.
    fn send(&self, message: SlaveMessage);
}

impl<T: MasterLink + ?Sized> MasterLink for std::sync::Arc<T> {
    fn send(&self, message: SlaveMessage) {
        (**self).send(message);
    }
}

impl MasterLink for Box<dyn MasterLink> {
    fn send(&self, message: SlaveMessage) {
        (**self).send(message);
    }
}

/// Link used while no master endpoint is configured; every send drops.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMaster;

impl MasterLink for NoMaster {
    fn send(&self, message: SlaveMessage) {
        tracing::debug!(?message, "no master configured, dropping message");
    }
}
