//! Downstream event sinks (§6 "Downstream event sink").
//!
//! `try_push`/`Full` mirrors `worker.rs`'s latest-wins/bounded-channel
//! posture (never block the producer); `crossbeam-channel`'s `try_send`
//! already returns exactly this shape, which is why `ChannelSink` is a thin
//! wrapper rather than hand-rolled state.

use crate::events::Event;
use tracing::info;

/// Outcome of a push to a sink (§6: "the core never awaits delivery").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Accepted,
    Full,
}

/// A downstream consumer of the event stream. Implementations must not block.
pub trait EventSink: Send {
    fn try_push(&self, event: &Event) -> PushResult;
}

/// Structured-logging sink; always accepts (tracing itself never backpressures
/// the core).
pub struct LogSink;

impl EventSink for LogSink {
    fn try_push(&self, event: &Event) -> PushResult {
        info!(kind = ?event.kind, frame_seq = event.frame_seq, summary = %event.summary, "event");
        PushResult::Accepted
    }
}

/// Bounded-channel sink; the host drains `receiver()` (TTS, webhook, alert
/// forwarders, etc. wire up here). Backpressure policy is "drop oldest":
/// when full, the oldest queued event is popped to make room, matching
/// §4.5's "a sink backpressuring ... causes the oldest events to be dropped".
pub struct ChannelSink {
    sender: crossbeam_channel::Sender<Event>,
    receiver: crossbeam_channel::Receiver<Event>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    pub fn receiver(&self) -> crossbeam_channel::Receiver<Event> {
        self.receiver.clone()
    }
}

impl EventSink for ChannelSink {
    fn try_push(&self, event: &Event) -> PushResult {
        match self.sender.try_send(event.clone()) {
            Ok(()) => PushResult::Accepted,
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                let _ = self.receiver.try_recv();
                match self.sender.try_send(event.clone()) {
                    Ok(()) => PushResult::Full,
                    Err(_) => PushResult::Full,
                }
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => PushResult::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventPayload};

    fn ev() -> Event {
        Event::new(EventKind::Heartbeat, 0, "test", EventPayload::default())
    }

    #[test]
    fn channel_sink_drops_oldest_when_full() {
        let sink = ChannelSink::new(1);
        assert_eq!(sink.try_push(&ev()), PushResult::Accepted);
        // second push evicts the first to make room
        assert_eq!(sink.try_push(&ev()), PushResult::Full);
        assert_eq!(sink.receiver().try_recv().map(|_| ()), Ok(()));
    }
}
