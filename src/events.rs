//! Completion events and the observers that receive them.
//!
//! Every pipeline invocation ends with exactly one [`BuildEvent`]. Watch
//! chains collapse their successful runs into a single `Completed` event so a
//! browser reload only happens once all bound pipelines are done.

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::transform::TransformError;

/// Outcome of a pipeline invocation or watch chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Every listed pipeline finished and wrote its outputs
    Completed {
        /// Pipelines that ran, in order
        pipelines: Vec<String>,
        /// Absolute paths written
        written: Vec<PathBuf>,
    },
    /// A pipeline failed; nothing it would have written was written
    Failed {
        /// Pipeline that failed
        pipeline: String,
        /// Adapter diagnostic
        error: TransformError,
    },
}

impl BuildEvent {
    pub fn is_completed(&self) -> bool {
        matches!(self, BuildEvent::Completed { .. })
    }
}

impl std::fmt::Display for BuildEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildEvent::Completed { pipelines, written } => {
                write!(f, "completed {} ({} files)", pipelines.join(" -> "), written.len())
            }
            BuildEvent::Failed { error, .. } => write!(f, "{}", error),
        }
    }
}

/// Observer for build events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &BuildEvent);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &BuildEvent) {
        match event {
            BuildEvent::Completed { .. } => tracing::info!("{}", event),
            BuildEvent::Failed { .. } => tracing::error!("{}", event),
        }
    }
}

/// Forwards events into a channel.
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: Mutex<Sender<BuildEvent>>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<BuildEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: &BuildEvent) {
        // A dropped receiver means nobody is listening anymore
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event.clone());
        }
    }
}

/// Fans every event out to several notifiers, in order.
#[derive(Default)]
pub struct NotifierSet {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for NotifierSet {
    fn notify(&self, event: &BuildEvent) {
        for notifier in &self.notifiers {
            notifier.notify(event);
        }
    }
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, event: &BuildEvent) {
        (**self).notify(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn completed(name: &str) -> BuildEvent {
        BuildEvent::Completed {
            pipelines: vec![name.to_string()],
            written: vec![PathBuf::from("/p/src/index.html")],
        }
    }

    #[test]
    fn test_channel_notifier_forwards() {
        let (tx, rx) = channel();
        let notifier = ChannelNotifier::new(tx);

        notifier.notify(&completed("html"));
        assert_eq!(rx.try_recv().unwrap(), completed("html"));
    }

    #[test]
    fn test_channel_notifier_survives_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);
        ChannelNotifier::new(tx).notify(&completed("html"));
    }

    #[test]
    fn test_notifier_set_fans_out() {
        let (tx1, rx1) = channel();
        let (tx2, rx2) = channel();
        let set = NotifierSet::new()
            .with(ChannelNotifier::new(tx1))
            .with(LogNotifier)
            .with(ChannelNotifier::new(tx2));

        assert_eq!(set.len(), 3);
        set.notify(&completed("js"));
        assert!(rx1.try_recv().unwrap().is_completed());
        assert!(rx2.try_recv().unwrap().is_completed());
    }

    #[test]
    fn test_event_display() {
        let event = BuildEvent::Completed {
            pipelines: vec!["sass".to_string(), "css".to_string()],
            written: vec![],
        };
        assert_eq!(event.to_string(), "completed sass -> css (0 files)");

        let failed = BuildEvent::Failed {
            pipeline: "js".to_string(),
            error: TransformError::new("command:npx", "boom").in_pipeline("js"),
        };
        assert_eq!(failed.to_string(), "[js] command:npx failed: boom");
    }
}
