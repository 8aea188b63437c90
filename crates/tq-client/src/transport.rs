//! Long-lived NDJSON link to the worker hub.
//!
//! `Transport::connect` spawns one link task that dials, re-announces the
//! session (`user_identified`, `join_batch`), then multiplexes socket reads,
//! queued commands and shutdown. Dropped links reconnect with doubling
//! backoff. Commands are fire-and-forget: while the link is down they are
//! dropped, and commands still queued when it drops are discarded. A
//! requested disconnect writes out whatever was already queued first.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::observers::Observers;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tq_core::command::{
    clamp_num_tabs, BatchCommandPayload, CommandSink, OutboundCommand, StartProcessingPayload,
};
use tq_core::event::{InboundEvent, PauseSignal, ProgressEvent};
use tq_core::wire::{encode_frame, FrameError, NdjsonFrameDecoder, WireEnvelope, WireKind};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

struct Shared {
    connected: AtomicBool,
    user_id: Mutex<Option<String>>,
    joined_batch: Mutex<Option<String>>,
    progress: Observers<ProgressEvent>,
    pauses: Observers<PauseSignal>,
    connection: Observers<ConnectionStatus>,
}

impl Shared {
    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            let status = if connected {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            };
            self.connection.publish(&status);
        }
    }

    /// Commands re-sent on every successful dial.
    fn greeting(&self) -> Vec<OutboundCommand> {
        let mut greeting = Vec::new();
        if let Some(user_id) = lock(&self.user_id).clone() {
            greeting.push(OutboundCommand::user_identified(user_id));
        }
        if let Some(batch_id) = lock(&self.joined_batch).clone() {
            greeting.push(OutboundCommand::join_batch(batch_id));
        }
        greeting
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Running {
    command_tx: mpsc::Sender<OutboundCommand>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Transport {
    config: Arc<ClientConfig>,
    shared: Arc<Shared>,
    running: Arc<Mutex<Option<Running>>>,
}

impl Transport {
    pub fn new(config: ClientConfig) -> Self {
        let capacity = config.observer_capacity;
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                user_id: Mutex::new(None),
                joined_batch: Mutex::new(None),
                progress: Observers::new("progress", capacity),
                pauses: Observers::new("pause", capacity),
                connection: Observers::new("connection", capacity),
            }),
            running: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts the link task. Calling it again while the task runs is a no-op.
    pub fn connect(&self) -> Result<(), ClientError> {
        let mut running = lock(&self.running);
        if running.as_ref().is_some_and(|run| !run.task.is_finished()) {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|err| ClientError::Transport(format!("no async runtime: {err}")))?;
        let (command_tx, command_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = handle.spawn(link_loop(
            Arc::clone(&self.config),
            Arc::clone(&self.shared),
            command_rx,
            shutdown_rx,
        ));
        *running = Some(Running {
            command_tx,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Stops the link task and waits for it. Safe when not connected.
    pub async fn disconnect(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };
        let _ = running.shutdown_tx.send(true);
        if let Err(err) = running.task.await {
            warn!(event = "transport_task_error", error = %err);
        }
        self.shared.set_connected(false);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> &Observers<ProgressEvent> {
        &self.shared.progress
    }

    pub fn pauses(&self) -> &Observers<PauseSignal> {
        &self.shared.pauses
    }

    pub fn connection(&self) -> &Observers<ConnectionStatus> {
        &self.shared.connection
    }

    /// Remembers the user for every future dial and announces it now.
    pub fn identify(&self, user_id: &str) {
        *lock(&self.shared.user_id) = Some(user_id.to_string());
        self.send(OutboundCommand::user_identified(user_id));
    }

    /// Remembers the batch room for every future dial and joins it now.
    pub fn join_batch(&self, batch_id: &str) {
        *lock(&self.shared.joined_batch) = Some(batch_id.to_string());
        self.send(OutboundCommand::join_batch(batch_id));
    }

    pub fn start_processing(&self, batch_id: &str, report_ids: Vec<String>, num_tabs: f64) {
        self.send(OutboundCommand::StartTaqeemProcessing(
            StartProcessingPayload::new(batch_id, report_ids, clamp_num_tabs(num_tabs)),
        ));
    }

    pub fn pause_processing(&self, batch_id: &str) {
        self.send(OutboundCommand::PauseProcessing(BatchCommandPayload::new(
            batch_id,
        )));
    }

    pub fn resume_processing(&self, batch_id: &str) {
        self.send(OutboundCommand::ResumeProcessing(BatchCommandPayload::new(
            batch_id,
        )));
    }

    pub fn stop_processing(&self, batch_id: &str) {
        self.send(OutboundCommand::StopProcessing(BatchCommandPayload::new(
            batch_id,
        )));
    }

    fn send(&self, command: OutboundCommand) {
        let kind = command.kind();
        if !self.is_connected() {
            debug!(event = "command_dropped", kind, reason = "offline");
            return;
        }
        let running = lock(&self.running);
        let Some(running) = running.as_ref() else {
            debug!(event = "command_dropped", kind, reason = "not_started");
            return;
        };
        match running.command_tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event = "command_dropped",
                    kind,
                    reason = "queue_full",
                    capacity = self.config.queue_capacity
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(event = "command_dropped", kind, reason = "channel_closed");
            }
        }
    }
}

impl CommandSink for Transport {
    fn send_command(&self, command: OutboundCommand) {
        self.send(command);
    }
}

pub fn next_backoff(current: Duration, cap: Duration) -> Duration {
    let next = current + current;
    if next > cap {
        cap
    } else {
        next
    }
}

/// Sleeps for `delay` unless shutdown is requested first. Returns whether to stop.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn link_loop(
    config: Arc<ClientConfig>,
    shared: Arc<Shared>,
    mut command_rx: mpsc::Receiver<OutboundCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let dialed = tokio::select! {
            dialed = TcpStream::connect(config.socket_addr.as_str()) => dialed,
            _ = shutdown.changed() => break,
        };
        let stream = match dialed {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    event = "transport_connect_error",
                    addr = %config.socket_addr,
                    error = %err,
                    retry_in_ms = backoff.as_millis() as u64
                );
                if wait_or_shutdown(backoff, &mut shutdown).await {
                    break;
                }
                backoff = next_backoff(backoff, config.max_backoff);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;

        let (mut reader, mut writer) = stream.into_split();
        let mut greeted = true;
        for command in shared.greeting() {
            if let Err(err) = send_command(&config, &mut writer, command).await {
                warn!(event = "transport_greeting_error", error = %err);
                greeted = false;
                break;
            }
        }
        if !greeted {
            if wait_or_shutdown(backoff, &mut shutdown).await {
                break;
            }
            backoff = next_backoff(backoff, config.max_backoff);
            continue;
        }

        info!(event = "transport_connect", addr = %config.socket_addr);
        shared.set_connected(true);

        let mut decoder = NdjsonFrameDecoder::<InboundEvent>::new(config.max_frame_bytes);
        let mut read_buf = [0u8; 8192];
        let mut stop = false;

        loop {
            tokio::select! {
                read = reader.read(&mut read_buf) => {
                    let read = match read {
                        Ok(value) => value,
                        Err(err) => {
                            warn!(event = "transport_read_error", error = %err);
                            break;
                        }
                    };
                    if read == 0 {
                        break;
                    }
                    let report = decoder.push_chunk(&read_buf[..read]);
                    log_frame_errors(report.errors);
                    for envelope in report.frames {
                        deliver(&shared, envelope);
                    }
                }
                maybe_command = command_rx.recv() => {
                    let Some(command) = maybe_command else {
                        stop = true;
                        break;
                    };
                    if let Err(err) = send_command(&config, &mut writer, command).await {
                        warn!(event = "transport_write_error", error = %err);
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        flush_queued(&config, &mut writer, &mut command_rx).await;
                        stop = true;
                        break;
                    }
                }
            }
        }

        let final_report = decoder.finish();
        log_frame_errors(final_report.errors);
        for envelope in final_report.frames {
            deliver(&shared, envelope);
        }
        shared.set_connected(false);
        let mut discarded = 0usize;
        while command_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(event = "command_dropped", reason = "link_lost", count = discarded);
        }
        info!(event = "transport_disconnect", addr = %config.socket_addr);

        if stop || wait_or_shutdown(backoff, &mut shutdown).await {
            break;
        }
        backoff = next_backoff(backoff, config.max_backoff);
    }
    shared.set_connected(false);
}

/// Writes commands accepted before a requested shutdown so a one-shot
/// caller's last command still reaches the hub.
async fn flush_queued(
    config: &ClientConfig,
    writer: &mut OwnedWriteHalf,
    command_rx: &mut mpsc::Receiver<OutboundCommand>,
) {
    while let Ok(command) = command_rx.try_recv() {
        if let Err(err) = send_command(config, writer, command).await {
            warn!(event = "transport_write_error", error = %err);
            return;
        }
    }
}

fn deliver(shared: &Shared, envelope: WireEnvelope<InboundEvent>) {
    if !envelope.version.is_supported() {
        warn!(
            event = "transport_version_skip",
            version = envelope.version.0,
            kind = envelope.msg.kind()
        );
        return;
    }
    debug!(
        event = "transport_inbound",
        kind = envelope.msg.kind(),
        sender = %envelope.sender_id,
        batch_id = envelope.msg.batch_id().unwrap_or("")
    );
    shared.progress.publish(&envelope.msg.normalize());
    if let Some(signal) = envelope.msg.pause_signal() {
        shared.pauses.publish(&signal);
    }
}

fn log_frame_errors(errors: Vec<FrameError>) {
    for err in errors {
        match err {
            FrameError::UnknownEvent(kind) => {
                warn!(event = "transport_unknown_event", kind = %kind);
            }
            other => warn!(event = "transport_decode_error", error = %other),
        }
    }
}

async fn send_command(
    config: &ClientConfig,
    writer: &mut OwnedWriteHalf,
    command: OutboundCommand,
) -> io::Result<()> {
    info!(
        event = "transport_outbound",
        kind = command.kind(),
        batch_id = command.batch_id().unwrap_or("")
    );
    let envelope = WireEnvelope::new(config.client_id.clone(), command);
    let frame = encode_frame(&envelope, config.max_frame_bytes)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
    let write = async {
        writer.write_all(&frame).await?;
        writer.flush().await
    };
    match tokio::time::timeout(config.write_timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let cap = Duration::from_secs(10);
        let mut delay = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay.as_secs());
            delay = next_backoff(delay, cap);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn greeting_repeats_identity_and_room() {
        let transport = Transport::new(ClientConfig::default());
        assert!(transport.shared.greeting().is_empty());
        transport.identify("u-1");
        transport.join_batch("B1");
        let kinds: Vec<&str> = transport
            .shared
            .greeting()
            .iter()
            .map(WireKind::kind)
            .collect();
        assert_eq!(kinds, vec!["user_identified", "join_batch"]);
    }

    #[test]
    fn connect_outside_runtime_is_an_error() {
        let transport = Transport::new(ClientConfig::default());
        assert!(matches!(transport.connect(), Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_a_no_op() {
        let transport = Transport::new(ClientConfig::default());
        transport.disconnect().await;
        transport.pause_processing("B1");
        assert!(!transport.is_connected());
    }
}
