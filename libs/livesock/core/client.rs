use crate::core::config::ClientConfig;
use crate::core::state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
use crate::{LivesockError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Receives every inbound text frame on the client's delivery task.
///
/// Implementations must be fast and non-blocking: the sink runs on the same
/// task that reads the socket. Dispatch slow work to other tasks.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, text: &str);
}

/// Connection lifecycle notifications
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connected to the server
    Connected,
    /// Disconnected from the server
    Disconnected,
    /// Reconnecting (attempt number)
    Reconnecting(usize),
    /// Error occurred
    Error(String),
}

/// Internal command messages for client control
#[derive(Debug)]
enum Command {
    /// Send a text frame
    Send(String),
    /// Intentional disconnect; disables auto-reconnect
    Disconnect,
}

/// Self-healing WebSocket client.
///
/// One background task owns the socket: it reads frames, answers protocol
/// pings, enforces the pong deadline, and reconnects with backoff when the
/// connection drops or goes dead. Registered replay frames are re-sent after
/// every successful open, so subscriptions survive reconnects.
pub struct WsClient {
    config: Arc<ClientConfig>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    /// Frames replayed after every successful open, in registration order
    replay: Arc<RwLock<Vec<String>>>,
    /// True while the run loop may (re)connect; cleared by `disconnect()`
    run_flag: Arc<AtomicBool>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    event_tx: Sender<ClientEvent>,
    event_rx: Receiver<ClientEvent>,
    sink: Arc<dyn FrameSink>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WsClient {
    /// Create a new client. No connection is made until [`connect`](Self::connect).
    pub fn new(config: ClientConfig, sink: Arc<dyn FrameSink>) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            config: Arc::new(config),
            state: Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected)),
            metrics: Arc::new(AtomicMetrics::new()),
            replay: Arc::new(RwLock::new(Vec::new())),
            run_flag: Arc::new(AtomicBool::new(false)),
            command_tx: Mutex::new(None),
            event_tx,
            event_rx,
            sink,
            task: Mutex::new(None),
        }
    }

    /// Start the connection task. Idempotent: a second call while the task
    /// is running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("connect() called while already running, ignoring");
                return;
            }
        }

        self.run_flag.store(true, Ordering::Release);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.command_tx.lock() = Some(command_tx);

        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let metrics = Arc::clone(&self.metrics);
        let replay = Arc::clone(&self.replay);
        let run_flag = Arc::clone(&self.run_flag);
        let event_tx = self.event_tx.clone();
        let sink = Arc::clone(&self.sink);

        *task = Some(tokio::spawn(async move {
            run_client(
                config, state, metrics, replay, run_flag, command_rx, event_tx, sink,
            )
            .await;
        }));
    }

    /// Send a text frame.
    ///
    /// Drops the frame silently when the connection is not open; the replay
    /// mechanism re-establishes subscriptions after a reconnect.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        if !self.state.is_connected() {
            debug!("send while not connected, dropping frame");
            return Ok(());
        }
        match &*self.command_tx.lock() {
            Some(tx) => tx
                .send(Command::Send(text.into()))
                .map_err(|e| LivesockError::ChannelSend(e.to_string())),
            None => Ok(()),
        }
    }

    /// Intentional disconnect. Disables auto-reconnect and closes the socket.
    pub fn disconnect(&self) {
        info!("disconnect requested");
        self.run_flag.store(false, Ordering::Release);
        if let Some(tx) = &*self.command_tx.lock() {
            let _ = tx.send(Command::Disconnect);
        }
    }

    /// Register a frame to be sent after every successful open.
    pub fn register_replay_frame(&self, frame: impl Into<String>) {
        self.replay.write().push(frame.into());
    }

    /// Remove a previously registered replay frame.
    pub fn unregister_replay_frame(&self, frame: &str) {
        self.replay.write().retain(|f| f != frame);
    }

    /// Get current connection state
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Check if connected
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Get current metrics
    pub fn metrics(&self) -> Metrics {
        Metrics {
            frames_sent: self.metrics.frames_sent(),
            frames_received: self.metrics.frames_received(),
            pings_sent: self.metrics.pings_sent(),
            pongs_received: self.metrics.pongs_received(),
            reconnect_count: self.metrics.reconnect_count(),
            connection_state: self.state.get(),
        }
    }

    /// Try to receive a client event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Wait for the background task to finish after `disconnect()`.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Main client task loop: connect, serve, back off, repeat.
#[allow(clippy::too_many_arguments)]
async fn run_client(
    config: Arc<ClientConfig>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    replay: Arc<RwLock<Vec<String>>>,
    run_flag: Arc<AtomicBool>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: Sender<ClientEvent>,
    sink: Arc<dyn FrameSink>,
) {
    let mut attempt = 0usize;

    loop {
        if !run_flag.load(Ordering::Acquire) {
            break;
        }

        state.set(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        if attempt > 0 {
            let _ = event_tx.send(ClientEvent::Reconnecting(attempt));
        }

        match connect_async(&config.url).await {
            Ok((ws_stream, _)) => {
                info!("connected to {}", config.url);
                state.set(ConnectionState::Connected);
                let _ = event_tx.send(ClientEvent::Connected);
                attempt = 0;

                let result = serve_connection(
                    ws_stream,
                    &config,
                    &metrics,
                    &replay,
                    &run_flag,
                    &mut command_rx,
                    &sink,
                )
                .await;

                state.set(ConnectionState::Disconnected);
                let _ = event_tx.send(ClientEvent::Disconnected);

                match result {
                    Ok(()) => {
                        // Intentional disconnect
                        break;
                    }
                    Err(e) => {
                        error!("connection lost: {}", e);
                        let _ = event_tx.send(ClientEvent::Error(e.to_string()));
                    }
                }
            }
            Err(e) => {
                error!("failed to connect to {}: {}", config.url, e);
                let _ = event_tx.send(ClientEvent::Error(e.to_string()));
                state.set(ConnectionState::Disconnected);
            }
        }

        if !run_flag.load(Ordering::Acquire) {
            break;
        }

        match config.backoff.delay_for(attempt) {
            Some(delay) => {
                info!("reconnecting in {:?} (attempt {})", delay, attempt + 1);
                if !sleep_unless_stopped(delay, &run_flag).await {
                    break;
                }
                attempt += 1;
                metrics.increment_reconnects();
            }
            None => {
                warn!("reconnect attempts exhausted, giving up");
                break;
            }
        }
    }

    state.set(ConnectionState::Disconnected);
    info!("client task exiting");
}

/// Sleep in small slices so `disconnect()` is honored promptly.
/// Returns false if the run flag was cleared during the wait.
async fn sleep_unless_stopped(duration: Duration, run_flag: &AtomicBool) -> bool {
    let slice = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        if !run_flag.load(Ordering::Acquire) {
            return false;
        }
        let step = slice.min(duration - elapsed);
        tokio::time::sleep(step).await;
        elapsed += step;
    }
    run_flag.load(Ordering::Acquire)
}

/// Serve one open connection: replay subscriptions, then pump frames,
/// commands, and the ping/pong liveness timers.
///
/// Returns `Ok(())` only for an intentional disconnect; every other exit is
/// an error that sends the caller into the reconnect path.
async fn serve_connection(
    ws_stream: WsStream,
    config: &ClientConfig,
    metrics: &AtomicMetrics,
    replay: &RwLock<Vec<String>>,
    run_flag: &AtomicBool,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    sink: &Arc<dyn FrameSink>,
) -> Result<()> {
    let (mut write, mut read) = ws_stream.split();

    // Replay registered subscription frames so the server resends snapshots
    let frames: Vec<String> = replay.read().clone();
    for frame in frames {
        write
            .send(Message::Text(frame))
            .await
            .map_err(|e| LivesockError::WebSocket(format!("failed to replay frame: {}", e)))?;
        metrics.increment_sent();
    }

    let mut ping_timer = tokio::time::interval(config.ping_interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately
    ping_timer.tick().await;

    let mut deadline = PongDeadline::new(config.pong_timeout);

    loop {
        if !run_flag.load(Ordering::Acquire) {
            let _ = write.close().await;
            return Ok(());
        }

        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics.increment_received();
                        sink.on_frame(&text);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await.map_err(|e| {
                            LivesockError::WebSocket(format!("failed to send pong: {}", e))
                        })?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        metrics.increment_pongs();
                        deadline.disarm();
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("close frame received");
                        return Err(LivesockError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(LivesockError::WebSocket(e.to_string()));
                    }
                    None => {
                        return Err(LivesockError::ConnectionClosed);
                    }
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Send(text)) => {
                        write.send(Message::Text(text)).await.map_err(|e| {
                            LivesockError::WebSocket(e.to_string())
                        })?;
                        metrics.increment_sent();
                    }
                    Some(Command::Disconnect) => {
                        info!("disconnect command received");
                        let _ = write.close().await;
                        return Ok(());
                    }
                    None => {
                        debug!("command channel closed");
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
            }

            _ = ping_timer.tick() => {
                if let Err(e) = deadline.arm(tokio::time::Instant::now()) {
                    warn!("pong still outstanding at next ping, terminating connection");
                    return Err(e);
                }
                write.send(Message::Ping(Vec::new())).await.map_err(|e| {
                    LivesockError::WebSocket(format!("failed to send ping: {}", e))
                })?;
                metrics.increment_pings();
            }

            _ = deadline_elapsed(deadline.armed_until()) => {
                warn!(
                    "no pong within {:?}, terminating connection",
                    config.pong_timeout
                );
                return Err(LivesockError::DeadConnection);
            }
        }
    }
}

/// Pong deadline for one live connection.
///
/// A ping arms the deadline and the matching pong disarms it. Two ways the
/// connection is declared dead: the deadline elapses, or the next ping
/// fires while one is still armed (possible when the ping interval is
/// shorter than the pong timeout).
struct PongDeadline {
    timeout: Duration,
    armed_until: Option<tokio::time::Instant>,
}

impl PongDeadline {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed_until: None,
        }
    }

    /// Arm for a freshly sent ping. Fails when the previous ping is still
    /// unanswered.
    fn arm(&mut self, now: tokio::time::Instant) -> Result<()> {
        if self.armed_until.is_some() {
            return Err(LivesockError::DeadConnection);
        }
        self.armed_until = Some(now + self.timeout);
        Ok(())
    }

    fn disarm(&mut self) {
        self.armed_until = None;
    }

    fn armed_until(&self) -> Option<tokio::time::Instant> {
        self.armed_until
    }
}

/// Resolves when the armed deadline passes; pends forever when no ping is
/// outstanding. Takes the instant by value so the select loop can mutate
/// the deadline from other branches.
async fn deadline_elapsed(armed_until: Option<tokio::time::Instant>) {
    match armed_until {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong_deadline_arm_disarm_cycle() {
        let mut deadline = PongDeadline::new(Duration::from_secs(10));
        let now = tokio::time::Instant::now();

        assert!(deadline.arm(now).is_ok());
        assert_eq!(deadline.armed_until, Some(now + Duration::from_secs(10)));

        deadline.disarm();
        assert!(deadline.armed_until.is_none());
        assert!(deadline.arm(now).is_ok());
    }

    #[test]
    fn test_pong_deadline_double_arm_is_dead() {
        let mut deadline = PongDeadline::new(Duration::from_secs(10));
        let now = tokio::time::Instant::now();

        assert!(deadline.arm(now).is_ok());
        // Next ping tick with the previous pong still outstanding
        assert!(matches!(
            deadline.arm(now + Duration::from_secs(30)),
            Err(LivesockError::DeadConnection)
        ));
    }
}
