/// Signal and control-message dispatch.
///
/// Both roles listen for the same three lifecycle signals:
/// - SIGTERM (and SIGINT): graceful stop
/// - SIGUSR1: restart
/// - SIGUSR2: diagnostic info
///
/// Workers additionally read newline-delimited JSON control messages
/// from stdin; the only defined message is `{"type":"shutdown"}`,
/// which a worker answers by exiting immediately with code 0.
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;

/// A lifecycle signal, decoded from the raw OS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorSignal {
    Stop,
    Restart,
    Info,
}

/// Control message sent master→worker over the worker's stdin pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Shutdown,
}

/// Owns the OS signal streams for this process.
///
/// Installed exactly once, during supervisor init; signal delivery is
/// serialized per process, so no handler re-entrancy exists.
pub struct SignalListener {
    sigterm: Signal,
    sigint: Signal,
    sigusr1: Signal,
    sigusr2: Signal,
}

impl SignalListener {
    /// Bind the fixed signal set.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sigusr1: signal(SignalKind::user_defined1())?,
            sigusr2: signal(SignalKind::user_defined2())?,
        })
    }

    /// Wait for the next lifecycle signal.
    pub async fn wait(&mut self) -> SupervisorSignal {
        tokio::select! {
            _ = self.sigterm.recv() => SupervisorSignal::Stop,
            _ = self.sigint.recv() => SupervisorSignal::Stop,
            _ = self.sigusr1.recv() => SupervisorSignal::Restart,
            _ = self.sigusr2.recv() => SupervisorSignal::Info,
        }
    }

    /// Spawn a task that forwards decoded signals to a channel, so the
    /// supervisor loop can `select!` on them alongside pool events.
    pub fn spawn_forwarder(mut self) -> mpsc::UnboundedReceiver<SupervisorSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let sig = self.wait().await;
                if tx.send(sig).is_err() {
                    // Receiver dropped, supervisor is gone
                    break;
                }
            }
        });
        rx
    }
}

/// Parse one line of the stdin control protocol.
///
/// Unknown or malformed lines are dropped; the protocol has exactly
/// one message and anything else is noise, not an error.
pub fn parse_control_line(line: &str) -> Option<ControlMessage> {
    match serde_json::from_str(line) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!(error = %e, "ignoring unrecognized control message");
            None
        }
    }
}

/// Spawn the worker-side stdin reader, forwarding control messages to
/// a channel. The channel closes when the master end of the pipe does.
pub fn spawn_control_reader() -> mpsc::UnboundedReceiver<ControlMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(msg) = parse_control_line(&line) {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        }
    });
    rx
}
