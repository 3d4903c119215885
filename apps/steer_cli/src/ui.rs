//! Terminal rendering of client events.

use std::fmt;

use client_core::{ClientEvent, DisplaySurface, SessionError, SessionOutcome};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for Banner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Info => "info",
            Severity::Error => "error",
        };
        write!(f, "[{tag}] {}", self.text)
    }
}

/// The notice shown when a session resolves. Ended sessions are informational, failures
/// are errors.
pub fn banner_for(outcome: &Result<SessionOutcome, SessionError>) -> Banner {
    match outcome {
        Ok(SessionOutcome::Timeout { message }) => Banner {
            severity: Severity::Info,
            text: format!(
                "{}. Start a new session to keep steering.",
                message.as_deref().unwrap_or("Your session has ended")
            ),
        },
        Ok(SessionOutcome::Disconnected) => Banner {
            severity: Severity::Info,
            text: "Connection to the coordinator closed. Start a new session to keep steering."
                .into(),
        },
        Ok(SessionOutcome::Stopped) => Banner {
            severity: Severity::Info,
            text: "Session stopped.".into(),
        },
        Err(SessionError::Rejected(message)) => Banner {
            severity: Severity::Error,
            text: format!("Session rejected: {message}. Try again later."),
        },
        Err(err) => Banner {
            severity: Severity::Error,
            text: format!("{err}. Try again later."),
        },
    }
}

pub fn render(event: &ClientEvent) -> String {
    match event {
        ClientEvent::StateChanged(state) => format!("state: {state}"),
        ClientEvent::SessionStarted {
            session_id,
            stream_url,
        } => format!("session {session_id} started, stream at {stream_url}"),
        ClientEvent::SessionEnded(outcome) => banner_for(outcome).to_string(),
        ClientEvent::QueueSize(size) => format!("queue: {size}"),
    }
}

/// Display surface for a terminal: announces the stream source instead of drawing it.
pub struct TerminalSurface;

impl DisplaySurface for TerminalSurface {
    fn set_source(&self, source: Option<&Url>) {
        match source {
            Some(url) => println!("display: {url}"),
            None => println!("display: cleared"),
        }
    }
}
