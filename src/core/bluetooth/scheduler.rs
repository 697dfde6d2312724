//! Single-flight operation scheduler
//! A FIFO queue plus one pending slot shared by every device. An operation
//! moves queue -> pending -> done; the next one starts only after the
//! current one is explicitly completed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::core::bluetooth::operation::{Operation, OperationKind};
use crate::core::bluetooth::types::DeviceId;

#[derive(Debug)]
struct InFlight {
    operation: Operation,
    started: Instant,
}

#[derive(Debug, Default)]
pub struct OperationScheduler {
    queue: VecDeque<Operation>,
    pending: Option<InFlight>,
}

impl OperationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `operation`. Returns true when the pipeline is idle and the
    /// caller should dispatch.
    pub fn enqueue(&mut self, operation: Operation) -> bool {
        trace!("Enqueued {}", operation);
        self.queue.push_back(operation);
        self.pending.is_none()
    }

    /// Moves the queue head into the pending slot.
    ///
    /// # Panics
    /// If an operation is already pending. Every entry point holds the engine
    /// lock and only dispatches when idle, so this is a logic error.
    pub fn begin_next(&mut self) -> Option<&Operation> {
        assert!(
            self.pending.is_none(),
            "begin_next() called while {:?} is pending",
            self.pending.as_ref().map(|p| &p.operation)
        );
        let Some(operation) = self.queue.pop_front() else {
            trace!("Operation queue empty, idle");
            return None;
        };
        self.pending = Some(InFlight {
            operation,
            started: Instant::now(),
        });
        self.pending.as_ref().map(|p| &p.operation)
    }

    /// Clears the pending slot and returns what was in it.
    pub fn complete(&mut self) -> Option<Operation> {
        let finished = self.pending.take().map(|p| p.operation);
        if let Some(operation) = &finished {
            debug!("End of {}", operation);
        }
        finished
    }

    pub fn pending(&self) -> Option<&Operation> {
        self.pending.as_ref().map(|p| &p.operation)
    }

    pub fn pending_kind(&self) -> Option<OperationKind> {
        self.pending().map(Operation::kind)
    }

    /// How long the pending operation has been in flight at `now`.
    pub fn pending_for(&self, now: Instant) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|p| now.saturating_duration_since(p.started))
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Operation> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// True if `device` has a queued or pending operation of `kind`.
    pub fn has_operation(&self, device: &DeviceId, kind: OperationKind) -> bool {
        self.pending()
            .into_iter()
            .chain(self.queue.iter())
            .any(|op| op.kind() == kind && op.targets(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn read(device: &str) -> Operation {
        Operation::CharacteristicRead {
            device: DeviceId::from(device),
            characteristic: Uuid::nil(),
        }
    }

    #[test]
    fn first_enqueue_requests_dispatch() {
        let mut scheduler = OperationScheduler::new();

        assert!(scheduler.enqueue(read("A")));
        scheduler.begin_next();
        assert!(!scheduler.enqueue(read("B")));
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[test]
    fn drains_in_submission_order() {
        let mut scheduler = OperationScheduler::new();
        for device in ["A", "B", "A", "C"] {
            scheduler.enqueue(read(device));
        }

        let mut order = Vec::new();
        while let Some(op) = scheduler.begin_next() {
            order.push(op.device().to_string());
            scheduler.complete();
        }

        assert_eq!(order, ["A", "B", "A", "C"]);
        assert!(scheduler.is_idle());
    }

    #[test]
    #[should_panic(expected = "pending")]
    fn beginning_twice_is_a_logic_error() {
        let mut scheduler = OperationScheduler::new();
        scheduler.enqueue(read("A"));
        scheduler.enqueue(read("B"));
        scheduler.begin_next();
        scheduler.begin_next();
    }

    #[test]
    fn finds_queued_and_pending_operations() {
        let mut scheduler = OperationScheduler::new();
        let device = DeviceId::from("A");
        scheduler.enqueue(Operation::Connect {
            device: device.clone(),
        });
        scheduler.enqueue(read("A"));

        assert!(scheduler.has_operation(&device, OperationKind::Connect));
        scheduler.begin_next();
        assert!(scheduler.has_operation(&device, OperationKind::Connect));
        assert!(scheduler.has_operation(&device, OperationKind::CharacteristicRead));
        assert!(!scheduler.has_operation(&device, OperationKind::Disconnect));
    }
}
