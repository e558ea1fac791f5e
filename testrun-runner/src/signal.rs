// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interrupting in-flight test runs.
//!
//! An [`InterruptSender`] is shared by whoever decides that the whole batch
//! should stop: a signal handler or the scheduler itself. Every running
//! [`TestRun`](crate::runner::TestRun) holds an [`InterruptSignal`] and
//! terminates its process as soon as the interrupt is raised.

use crate::errors::SignalHandlerSetupError;
use tokio::{sync::watch, task::JoinHandle};
use tracing::info;

/// Creates a new interrupt channel.
pub fn interrupt_channel() -> (InterruptSender, InterruptSignal) {
    let (tx, rx) = watch::channel(false);
    (InterruptSender { tx }, InterruptSignal { rx })
}

/// The sending half of an interrupt channel.
#[derive(Debug)]
pub struct InterruptSender {
    tx: watch::Sender<bool>,
}

impl InterruptSender {
    /// Interrupts every run subscribed to this channel. Idempotent.
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    /// Returns a new receiving half.
    pub fn subscribe(&self) -> InterruptSignal {
        InterruptSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// The receiving half of an interrupt channel.
#[derive(Clone, Debug)]
pub struct InterruptSignal {
    rx: watch::Receiver<bool>,
}

impl InterruptSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_, signal) = interrupt_channel();
        signal
    }

    /// Returns true if the interrupt has been raised.
    pub fn is_interrupted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the interrupt is raised.
    ///
    /// If the sender is dropped without raising the interrupt, this never
    /// completes. Cancel-safe.
    pub async fn interrupted(&mut self) {
        if self.rx.wait_for(|interrupted| *interrupted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The kind of signal handling to set up for a batch of test runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignalHandlerKind {
    /// Interrupt the batch on Ctrl-C, and on SIGTERM or SIGHUP on Unix.
    Standard,

    /// Don't listen for signals. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Installs the signal handler, forwarding the first shutdown signal to
    /// `sender`.
    ///
    /// Must be called from within a Tokio runtime. Returns the forwarding
    /// task, or `None` for [`Noop`](Self::Noop).
    pub fn install(
        self,
        sender: InterruptSender,
    ) -> Result<Option<JoinHandle<()>>, SignalHandlerSetupError> {
        match self {
            Self::Standard => {
                let mut signals = imp::Signals::new()?;
                Ok(Some(tokio::spawn(async move {
                    if let Some(event) = signals.recv().await {
                        info!(?event, "received shutdown signal, interrupting tests");
                        sender.interrupt();
                    }
                })))
            }
            Self::Noop => Ok(None),
        }
    }
}

/// A signal that shuts down the batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ShutdownEvent {
    #[cfg(unix)]
    Hangup,
    #[cfg(unix)]
    Term,
    Interrupt,
}

#[cfg(unix)]
mod imp {
    use super::ShutdownEvent;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    /// SIGINT, SIGTERM and SIGHUP.
    #[derive(Debug)]
    pub(super) struct Signals {
        sigint: SignalWithDone,
        sighup: SignalWithDone,
        sigterm: SignalWithDone,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self {
                sigint: SignalWithDone::new(SignalKind::interrupt())?,
                sighup: SignalWithDone::new(SignalKind::hangup())?,
                sigterm: SignalWithDone::new(SignalKind::terminate())?,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            loop {
                tokio::select! {
                    recv = self.sigint.signal.recv(), if !self.sigint.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Interrupt),
                            None => self.sigint.done = true,
                        }
                    }
                    recv = self.sighup.signal.recv(), if !self.sighup.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Hangup),
                            None => self.sighup.done = true,
                        }
                    }
                    recv = self.sigterm.signal.recv(), if !self.sigterm.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Term),
                            None => self.sigterm.done = true,
                        }
                    }
                    else => break None,
                }
            }
        }
    }

    #[derive(Debug)]
    struct SignalWithDone {
        signal: Signal,
        done: bool,
    }

    impl SignalWithDone {
        fn new(kind: SignalKind) -> std::io::Result<Self> {
            Ok(Self {
                signal: signal(kind)?,
                done: false,
            })
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::ShutdownEvent;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self { ctrl_c: ctrl_c()? })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            self.ctrl_c.recv().await.map(|()| ShutdownEvent::Interrupt)
        }
    }
}
