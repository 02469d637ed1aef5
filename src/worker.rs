//! Background worker that owns a [`Receiver`] connection
//!
//! All I/O for the receiver runs on one spawned task. Callers enqueue
//! commands through a [`CommandQueue`]; unsolicited messages from the
//! receiver are handed to a callback.
//!
//! Messages that arrive after a plain [`CommandQueue::send_async`] and
//! before the matching phase of the next [`CommandQueue::request_async`]
//! are consumed by that matching phase and never reach the callback.

use crate::connection::DRAIN_TIMEOUT;
use crate::error::{IscpError, Result};
use crate::receiver::Receiver;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback invoked for every unsolicited message
pub type MessageCallback = Box<dyn FnMut(String) + Send + 'static>;

/// Lifecycle of the background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Running,
    Stopping,
    /// The worker exited on its own after a fatal error. [`AsyncReceiver::disconnect`]
    /// or [`AsyncReceiver::connect`] reclaims the receiver.
    Stopped,
}

/// A queued outbound command
struct Outbound {
    id: Uuid,
    command: String,
    reply: Option<oneshot::Sender<Result<String>>>,
}

/// Reply to a [`CommandQueue::request_async`] call
///
/// Resolves to the matching message, [`IscpError::ResponseTimeout`], or
/// [`IscpError::ConnectionClosed`] if the worker stopped first.
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<String>>,
}

impl Future for PendingResponse {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(IscpError::ConnectionClosed)))
    }
}

/// Cloneable handle for enqueueing commands from any task or thread
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl CommandQueue {
    /// Queue a command without waiting for a reply
    pub fn send_async(&self, command: impl Into<String>) -> Result<()> {
        self.enqueue(command.into(), None)
    }

    /// Queue a command and get a future for its reply
    pub fn request_async(&self, command: impl Into<String>) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(command.into(), Some(tx))?;
        Ok(PendingResponse { rx })
    }

    fn enqueue(
        &self,
        command: String,
        reply: Option<oneshot::Sender<Result<String>>>,
    ) -> Result<()> {
        let id = Uuid::new_v4();
        tracing::debug!(%id, "Queueing {}", command);
        self.tx
            .send(Outbound { id, command, reply })
            .map_err(|_| IscpError::NotConnected)
    }
}

/// What the worker task hands back when it ends
struct WorkerExit {
    receiver: Receiver,
    callback: MessageCallback,
    error: Option<IscpError>,
}

enum WorkerState {
    Idle {
        receiver: Receiver,
        callback: MessageCallback,
    },
    Running {
        queue: CommandQueue,
        stop_tx: oneshot::Sender<()>,
        task: JoinHandle<WorkerExit>,
    },
    Stopping,
}

/// A [`Receiver`] driven by a background worker
///
/// # Example
///
/// ```no_run
/// use eiscp::{AsyncReceiver, Receiver};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let receiver = Receiver::new("192.168.1.125", 60128);
///     let mut receiver = AsyncReceiver::new(receiver, |message| {
///         println!("Receiver says: {}", message);
///     });
///
///     receiver.connect().await?;
///     receiver.send_async("PWR01")?;
///     let volume = receiver.request_async("MVLQSTN")?.await?;
///     println!("Volume: {}", volume);
///
///     receiver.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct AsyncReceiver {
    state: WorkerState,
    last_error: Option<IscpError>,
}

impl AsyncReceiver {
    /// Wrap a receiver; `callback` gets every unsolicited message
    pub fn new(receiver: Receiver, callback: impl FnMut(String) + Send + 'static) -> Self {
        Self {
            state: WorkerState::Idle {
                receiver,
                callback: Box::new(callback),
            },
            last_error: None,
        }
    }

    /// Current worker lifecycle state
    pub fn status(&self) -> WorkerStatus {
        match &self.state {
            WorkerState::Idle { .. } => WorkerStatus::Idle,
            WorkerState::Running { task, .. } if task.is_finished() => WorkerStatus::Stopped,
            WorkerState::Running { .. } => WorkerStatus::Running,
            WorkerState::Stopping => WorkerStatus::Stopping,
        }
    }

    /// Error that ended the last worker run, if it stopped on its own
    pub fn last_error(&self) -> Option<&IscpError> {
        self.last_error.as_ref()
    }

    /// Connect and start the background worker
    ///
    /// Does nothing if the worker is already running. A worker that has
    /// stopped on its own is reaped first.
    pub async fn connect(&mut self) -> Result<()> {
        if self.status() == WorkerStatus::Stopped {
            self.disconnect().await;
        }
        if !matches!(self.state, WorkerState::Idle { .. }) {
            return Ok(());
        }
        let WorkerState::Idle {
            mut receiver,
            callback,
        } = std::mem::replace(&mut self.state, WorkerState::Stopping)
        else {
            return Ok(());
        };

        if let Err(e) = receiver.ensure_connected().await {
            self.state = WorkerState::Idle { receiver, callback };
            return Err(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        tracing::info!("Starting worker for {}", receiver);
        let task = tokio::spawn(run_worker(receiver, callback, rx, stop_rx));
        self.last_error = None;

        self.state = WorkerState::Running {
            queue: CommandQueue { tx },
            stop_tx,
            task,
        };
        Ok(())
    }

    /// Stop the worker and close the connection
    ///
    /// The worker finishes its current iteration first; an in-flight
    /// request is not cancelled. If the worker already stopped on its own,
    /// its error is kept in [`AsyncReceiver::last_error`]. Queued commands not yet sent are dropped
    /// and their pending responses resolve to [`IscpError::ConnectionClosed`].
    pub async fn disconnect(&mut self) {
        if !matches!(self.state, WorkerState::Running { .. }) {
            return;
        }
        let WorkerState::Running { stop_tx, task, .. } =
            std::mem::replace(&mut self.state, WorkerState::Stopping)
        else {
            return;
        };

        let _ = stop_tx.send(());
        match task.await {
            Ok(WorkerExit {
                mut receiver,
                callback,
                error,
            }) => {
                receiver.disconnect().await;
                self.last_error = error;
                self.state = WorkerState::Idle { receiver, callback };
            }
            Err(e) => {
                // The receiver went down with the task; nothing to hand back.
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }

    /// Handle for enqueueing from other tasks, if the worker is running
    pub fn queue(&self) -> Option<CommandQueue> {
        self.running_queue().ok().cloned()
    }

    /// Queue a command without waiting for a reply
    pub fn send_async(&self, command: impl Into<String>) -> Result<()> {
        self.running_queue()?.send_async(command)
    }

    /// Queue a command and get a future for its reply
    pub fn request_async(&self, command: impl Into<String>) -> Result<PendingResponse> {
        self.running_queue()?.request_async(command)
    }

    fn running_queue(&self) -> Result<&CommandQueue> {
        match &self.state {
            WorkerState::Running { queue, task, .. } if !task.is_finished() => Ok(queue),
            _ => Err(IscpError::NotConnected),
        }
    }

    /// Get the wrapped receiver back, stopping the worker first
    pub async fn into_inner(mut self) -> Option<Receiver> {
        self.disconnect().await;
        match self.state {
            WorkerState::Idle { receiver, .. } => Some(receiver),
            _ => None,
        }
    }
}

async fn run_worker(
    mut receiver: Receiver,
    mut callback: MessageCallback,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    mut stop_rx: oneshot::Receiver<()>,
) -> WorkerExit {
    let queue_wait = receiver.config().queue_wait;

    loop {
        if !matches!(stop_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            tracing::info!("Worker for {} stopping", receiver);
            break;
        }

        // Unsolicited messages
        loop {
            match receiver.receive(DRAIN_TIMEOUT).await {
                Ok(Some(message)) => callback(message),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Worker for {} lost the connection: {}", receiver, e);
                    return WorkerExit::failed(receiver, callback, e).await;
                }
            }
        }

        let item = match tokio::time::timeout(queue_wait, queue.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(item)) => item,
        };

        tracing::debug!(id = %item.id, "Sending {}", item.command);
        let sent = receiver.send(&item.command).await;

        let Some(reply) = item.reply else {
            if let Err(e) = sent {
                tracing::error!(id = %item.id, "Failed to send {}: {}", item.command, e);
                if e.is_fatal() {
                    return WorkerExit::failed(receiver, callback, e).await;
                }
            }
            continue;
        };

        let result = match sent {
            Ok(()) => receiver.wait_for_response(&item.command).await,
            Err(e) => Err(e),
        };
        let fatal = match &result {
            Err(e) if e.is_fatal() => Some(copy_fatal(e)),
            _ => None,
        };
        if let Err(e) = &result {
            tracing::warn!(id = %item.id, "Request {} failed: {}", item.command, e);
        }
        let _ = reply.send(result);
        if let Some(e) = fatal {
            return WorkerExit::failed(receiver, callback, e).await;
        }
    }

    WorkerExit {
        receiver,
        callback,
        error: None,
    }
}

impl WorkerExit {
    async fn failed(mut receiver: Receiver, callback: MessageCallback, error: IscpError) -> Self {
        receiver.disconnect().await;
        Self {
            receiver,
            callback,
            error: Some(error),
        }
    }
}

/// Second copy of a fatal error: one goes to the requester, one ends the run
fn copy_fatal(error: &IscpError) -> IscpError {
    match error {
        IscpError::MalformedHeader(msg) => IscpError::MalformedHeader(msg.clone()),
        IscpError::MalformedMessage(msg) => IscpError::MalformedMessage(msg.clone()),
        IscpError::Io(e) => IscpError::Io(std::io::Error::new(e.kind(), e.to_string())),
        _ => IscpError::ConnectionClosed,
    }
}
