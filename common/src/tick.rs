use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Queued,
    /// A tick was already pending; this trigger folded into it.
    Coalesced,
    Closed,
}

/// Periodic-timer side of the single-slot tick queue.
#[derive(Debug, Clone)]
pub struct TickTrigger {
    sender: SyncSender<()>,
}

/// Control-loop side of the single-slot tick queue.
#[derive(Debug)]
pub struct TickReceiver {
    receiver: Receiver<()>,
}

/// At most one tick is ever pending. Timer firings that land while a tick is
/// pending or running are coalesced instead of stacking up behind a ramp.
pub fn tick_queue() -> (TickTrigger, TickReceiver) {
    let (sender, receiver) = mpsc::sync_channel(1);
    (TickTrigger { sender }, TickReceiver { receiver })
}

impl TickTrigger {
    pub fn trigger(&self) -> TriggerOutcome {
        match self.sender.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(TrySendError::Full(())) => TriggerOutcome::Coalesced,
            Err(TrySendError::Disconnected(())) => TriggerOutcome::Closed,
        }
    }
}

impl TickReceiver {
    /// Blocks until a tick is due. `false` once every trigger is gone.
    pub fn wait(&self) -> bool {
        self.receiver.recv().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn coalesces_while_pending() {
        let (trigger, receiver) = tick_queue();

        assert_eq!(trigger.trigger(), TriggerOutcome::Queued);
        assert_eq!(trigger.trigger(), TriggerOutcome::Coalesced);
        assert_eq!(trigger.trigger(), TriggerOutcome::Coalesced);

        assert!(receiver.wait());
        assert_eq!(trigger.trigger(), TriggerOutcome::Queued);
    }

    #[test]
    fn wait_ends_when_triggers_drop() {
        let (trigger, receiver) = tick_queue();
        let timer = trigger.clone();

        let handle = thread::spawn(move || {
            timer.trigger();
        });
        handle.join().unwrap();
        drop(trigger);

        assert!(receiver.wait());
        assert!(!receiver.wait());
    }

    #[test]
    fn reports_closed_queue() {
        let (trigger, receiver) = tick_queue();
        drop(receiver);

        assert_eq!(trigger.trigger(), TriggerOutcome::Closed);
    }
}
