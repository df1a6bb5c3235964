//! Scripted stand-ins for the supplicant's control and event sockets.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use wlinkd_core::BoxFuture;
use wlinkd_core::supplicant::{ControlChannel, EventChannel, SupplicantError};

/// Commands a [`ScriptedControl`] has received, in order.
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().expect("command log poisoned").clone()
    }

    /// Commands whose first word is `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }
}

/// Control channel answering from a fixed queue of replies.
///
/// A `None` entry fails that exchange. Requests past the end of the script
/// fail as well.
///
/// ```ignore
/// let control = ScriptedControl::new().reply("3").reply("OK").reply("FAIL");
/// let log = control.log();
/// ```
#[derive(Debug, Default)]
pub struct ScriptedControl {
    replies: VecDeque<Option<String>>,
    log: CommandLog,
}

impl ScriptedControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, text: impl Into<String>) -> Self {
        self.replies.push_back(Some(text.into()));
        self
    }

    /// The next exchange times out.
    pub fn fail(mut self) -> Self {
        self.replies.push_back(None);
        self
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl ControlChannel for ScriptedControl {
    fn request<'a>(
        &'a mut self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<String, SupplicantError>> {
        self.log
            .0
            .lock()
            .expect("command log poisoned")
            .push(command.to_string());
        let verb = command.split_whitespace().next().unwrap_or("").to_string();
        let result = match self.replies.pop_front() {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(SupplicantError::Command {
                verb,
                reason: "scripted failure".to_string(),
            }),
            None => Err(SupplicantError::Command {
                verb,
                reason: "script exhausted".to_string(),
            }),
        };
        Box::pin(async move { result })
    }
}

/// Event channel fed by an [`EventFeed`]. Dropping the feed ends the
/// channel with [`SupplicantError::ChannelClosed`].
pub struct ScriptedEvents {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Sending side of a [`ScriptedEvents`] channel.
#[derive(Clone)]
pub struct EventFeed {
    tx: mpsc::UnboundedSender<String>,
}

impl EventFeed {
    /// Deliver one raw event record, e.g. `<3>CTRL-EVENT-CONNECTED - ...`.
    pub fn send(&self, record: impl Into<String>) {
        let _ = self.tx.send(record.into());
    }
}

pub fn scripted_events() -> (ScriptedEvents, EventFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ScriptedEvents { rx }, EventFeed { tx })
}

impl EventChannel for ScriptedEvents {
    fn recv(&mut self) -> BoxFuture<'_, Result<String, SupplicantError>> {
        Box::pin(async move { self.rx.recv().await.ok_or(SupplicantError::ChannelClosed) })
    }
}
