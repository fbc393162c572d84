use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::runtime::Runtime;

use crate::{
    capability::Notifier,
    events::{EngineEvent, JobEvent, Message, RenewalEvent, Severity},
    runtime::Channel,
};

/// Forwards terminal events to the desktop-notification collaborator.
///
/// Subscribes to the engine channel and renders terminal job events and
/// renewal failures into (title, body, severity) triples, subject to the
/// global mute flag. Successful renewals and tree events stay silent.
pub struct NotificationSink {
    channel: Arc<Channel>,
    notifier: Arc<dyn Notifier>,
    muted: Arc<AtomicBool>,

    runtime: Arc<Runtime>,
}

impl NotificationSink {
    pub fn new(
        channel: Arc<Channel>,
        notifier: Arc<dyn Notifier>,
        muted: bool,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            channel,
            notifier,
            muted: Arc::new(AtomicBool::new(muted)),
            runtime,
        }
    }

    pub fn set_muted(
        &self,
        muted: bool,
    ) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Start draining the event queue.
    pub fn listen(&self) {
        let channel = self.channel.clone();
        let notifier = self.notifier.clone();
        let muted = self.muted.clone();

        self.runtime.spawn(async move {
            let mut event_queue = channel.event_queue().subscribe();
            while let Ok(event_msg) = event_queue.recv().await {
                if muted.load(Ordering::Relaxed) {
                    continue;
                }
                if let Some((title, body, severity)) = render(&event_msg) {
                    notifier.notify(&title, &body, severity).await;
                }
            }
        });
    }
}

fn render(message: &Message) -> Option<(String, String, Severity)> {
    match &message.event {
        EngineEvent::Job(event) => match event {
            JobEvent::Started {
                ..
            } => None,
            JobEvent::Succeeded {
                kind,
                ..
            } => Some((format!("{}: {} succeeded", message.backend, kind), format!("job {} finished", message.subject), Severity::Info)),
            JobEvent::Failed {
                kind,
                exit,
            } => Some((
                format!("{}: {} failed", message.backend, kind),
                exit.message.clone().unwrap_or_else(|| format!("exit code {:?}", exit.code)),
                Severity::Error,
            )),
            JobEvent::Cancelled {
                kind,
                cause,
            } => Some((format!("{}: {} cancelled", message.backend, kind), cause.to_string(), Severity::Warning)),
        },
        EngineEvent::Renewal(event) => match event {
            RenewalEvent::Renewed(_) => None,
            RenewalEvent::RenewFailed(error) => Some((format!("{}: renewal failed", message.backend), error.clone(), Severity::Warning)),
        },
        EngineEvent::Tree(_) => None,
    }
}
