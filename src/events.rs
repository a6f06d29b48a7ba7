use serde::Serialize;
use tokio::sync::mpsc;

use crate::cases::CaseId;
use crate::judge::RunResult;

/// Notifications pushed to the display surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Event {
    CompilingStart,
    CompilingStop,
    CompileDiagnostics { diagnostics: String },
    /// Nothing is running any more, e.g. after a failed compile
    NotRunning,
    CaseRunning { id: CaseId },
    CaseResult { id: CaseId, result: RunResult },
    CaseNotRunning { id: CaseId },
}

/// Sending half of the event channel.
///
/// The channel is unbounded so publishing never waits on the display
/// surface; events sent after the receiver is gone are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink without subscriber
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: Event) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(event) {
            log::trace!("Display surface is gone, dropped {:?}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_delivered_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(Event::CompilingStart);
        sink.emit(Event::CompilingStop);

        assert_eq!(rx.try_recv().unwrap(), Event::CompilingStart);
        assert_eq!(rx.try_recv().unwrap(), Event::CompilingStop);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(Event::NotRunning);
        EventSink::disconnected().emit(Event::NotRunning);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(Event::CaseNotRunning { id: CaseId(7) }).unwrap();
        assert_eq!(json, serde_json::json!({"command": "case-not-running", "id": 7}));
        let json = serde_json::to_value(Event::CompilingStart).unwrap();
        assert_eq!(json, serde_json::json!({"command": "compiling-start"}));
    }
}
