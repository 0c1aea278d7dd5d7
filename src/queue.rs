//! Command Queue
//!
//! Tracks commands sent to the gateway until their acknowledgement arrives.
//! Each queued command carries an expectation describing the response that
//! completes it and a result channel exposed to the caller as a
//! [`CommandHandle`]. A periodic sweep resends commands the gateway has not
//! answered and fails them after too many attempts.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::protocol::ConfigId;

/// Resend an unanswered command after this long
pub const RESEND_AFTER: Duration = Duration::from_secs(10);
/// Give up after this many resends of an unanswered command
pub const MAX_RESENDS: u8 = 5;

/// Command submission or acknowledgement failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("gateway is in monitor mode")]
    NotGatewayMode,
    #[error("command was not acknowledged")]
    NotAcknowledged,
    #[error("not connected to a gateway")]
    NotConnected,
}

/// Response that completes a pending command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Literal line prefix, the command echo
    Literal(String),
    /// Configuration report matched by the item's response pattern
    Config(ConfigId),
}

/// Receiving end of a command's result
#[derive(Debug)]
pub struct CommandHandle {
    rx: Receiver<Result<(), CommandError>>,
}

impl CommandHandle {
    /// Handle that is already resolved, for commands without a tracked
    /// acknowledgement
    pub(crate) fn resolved() -> Self {
        let (tx, rx) = channel();
        let _ = tx.send(Ok(()));
        CommandHandle { rx }
    }

    pub(crate) fn pending() -> (Sender<Result<(), CommandError>>, Self) {
        let (tx, rx) = channel();
        (tx, CommandHandle { rx })
    }

    /// Non-blocking check. Returns None while the command is outstanding.
    pub fn try_result(&self) -> Option<Result<(), CommandError>> {
        self.rx.try_recv().ok()
    }

    /// Block until the command resolves or the timeout expires
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), CommandError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CommandError::NotAcknowledged),
            Err(RecvTimeoutError::Disconnected) => Err(CommandError::NotConnected),
        }
    }
}

/// One command awaiting its acknowledgement
#[derive(Debug)]
pub struct PendingCommand {
    pub sent: String,
    pub expect: Expectation,
    pub sent_at: Instant,
    pub resends: u8,
    done: Sender<Result<(), CommandError>>,
}

/// Queue of commands awaiting acknowledgement, in send order
#[derive(Debug, Default)]
pub struct CommandQueue {
    pub(crate) pending: Vec<PendingCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a sent command, returning the caller's result handle
    pub fn push(&mut self, sent: String, expect: Expectation, now: Instant) -> CommandHandle {
        let (done, handle) = CommandHandle::pending();
        self.pending.push(PendingCommand {
            sent,
            expect,
            sent_at: now,
            resends: 0,
            done,
        });
        handle
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingCommand> {
        self.pending.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove the command at `idx` and resolve its handle
    pub fn complete(&mut self, idx: usize, result: Result<(), CommandError>) {
        let cmd = self.pending.remove(idx);
        let _ = cmd.done.send(result);
    }

    /// Resend overdue commands and fail those past the attempt limit. The
    /// `resend` closure reissues the command line on the wire.
    pub fn sweep<F>(&mut self, now: Instant, mut resend: F)
    where
        F: FnMut(&str),
    {
        let mut idx = 0;
        while idx < self.pending.len() {
            let cmd = &mut self.pending[idx];
            if now.duration_since(cmd.sent_at) < RESEND_AFTER {
                idx += 1;
                continue;
            }
            cmd.resends += 1;
            if cmd.resends <= MAX_RESENDS {
                log::debug!("resending unacknowledged command {}", cmd.sent);
                cmd.sent_at = now;
                resend(&cmd.sent);
                idx += 1;
            } else {
                log::warn!("giving up on command {}", cmd.sent);
                self.complete(idx, Err(CommandError::NotAcknowledged));
            }
        }
    }

    /// Fail every pending command, used when the link drops
    pub fn fail_all(&mut self, error: CommandError) {
        for cmd in self.pending.drain(..) {
            let _ = cmd.done.send(Err(error.clone()));
        }
    }
}
