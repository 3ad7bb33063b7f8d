use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{Channel, Frame, RemoteInputTransport, TransportEvent};
use crate::error::TransportError;
use crate::event_model::{FocusInputEvent, KeyboardInputEvent, MouseInputEvent, TouchInputEvent};
use crate::input_devices::lock;

struct TcpShared {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

impl TcpShared {
    /// 只有第一次从已连接变成断开时才广播
    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("tcp transport disconnected");
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }
}

/// 把事件按行写成 JSON 的 TCP 连接
///
/// 对端发回的行只记日志; 读到 EOF 视为对端断开
pub struct TcpTransport {
    shared: Arc<TcpShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(TcpShared {
                writer: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                events,
            }),
            reader: Mutex::new(None),
        }
    }

    async fn write_frame<T: Serialize>(&self, channel: Channel, event: &T) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(&Frame { channel, event })?;
        line.push(b'\n');

        let mut writer = self.shared.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        if let Err(err) = stream.write_all(&line).await {
            warn!(%err, "tcp write failed");
            writer.take();
            drop(writer);
            let _ = self.shared.events.send(TransportEvent::Error(err.to_string()));
            self.shared.mark_disconnected();
            return Err(err.into());
        }
        trace!(?channel, bytes = line.len(), "frame written");
        Ok(())
    }

    fn stop_reader(&self) {
        if let Some(task) = lock(&self.reader).take() {
            task.abort();
        }
    }
}

async fn read_replies(read: OwnedReadHalf, shared: Arc<TcpShared>) {
    let mut lines = BufReader::new(read).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(%line, "remote reply"),
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "tcp read failed");
                let _ = shared.events.send(TransportEvent::Error(err.to_string()));
                break;
            }
        }
    }
    shared.writer.lock().await.take();
    shared.mark_disconnected();
}

#[async_trait]
impl RemoteInputTransport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        self.disconnect().await;
        let stream = match TcpStream::connect(address).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(address, %err, "tcp connect failed");
                let _ = self.shared.events.send(TransportEvent::Error(err.to_string()));
                return Err(err.into());
            }
        };
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        *self.shared.writer.lock().await = Some(write);
        self.shared.connected.store(true, Ordering::Release);
        *lock(&self.reader) = Some(tokio::spawn(read_replies(read, Arc::clone(&self.shared))));

        info!(address, "tcp transport connected");
        let _ = self.shared.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.stop_reader();
        if let Some(mut stream) = self.shared.writer.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.shared.mark_disconnected();
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn send_mouse_event(&self, event: &MouseInputEvent) -> Result<(), TransportError> {
        self.write_frame(Channel::Mouse, event).await
    }

    async fn send_keyboard_event(&self, event: &KeyboardInputEvent) -> Result<(), TransportError> {
        self.write_frame(Channel::Keyboard, event).await
    }

    async fn send_touch_event(&self, event: &TouchInputEvent) -> Result<(), TransportError> {
        self.write_frame(Channel::Touch, event).await
    }

    async fn send_focus_event(&self, event: &FocusInputEvent) -> Result<(), TransportError> {
        self.write_frame(Channel::Focus, event).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::event_model::{Modifiers, MouseEventKind, Point};

    #[tokio::test]
    async fn frames_are_newline_delimited_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::new();
        let mut events = transport.subscribe_events();

        transport.connect(&address).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected);

        let down = MouseInputEvent::new(MouseEventKind::Down, Point::new(10.0, 20.0), 0, 1, 5.0);
        transport.send_mouse_event(&down).await.unwrap();
        let key = KeyboardInputEvent {
            kind: crate::event_model::KeyboardEventKind::Keydown,
            key_code: 65,
            key: "a".into(),
            char_code: 0,
            modifiers: Modifiers::NONE,
            is_auto_repeat: false,
            timestamp: 6.0,
            validated: true,
        };
        transport.send_keyboard_event(&key).await.unwrap();

        let mut lines = BufReader::new(peer).lines();
        let first: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["channel"], "mouse");
        assert_eq!(first["event"]["kind"], "down");
        assert_eq!(first["event"]["buttons"], 1);
        let second: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["channel"], "keyboard");
        assert_eq!(second["event"]["keyCode"], 65);
    }

    #[tokio::test]
    async fn peer_close_reports_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::new();
        let mut events = transport.subscribe_events();

        transport.connect(&address).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);

        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Disconnected);
        assert!(!transport.is_connected());
        let up = MouseInputEvent::new(MouseEventKind::Up, Point::new(0.0, 0.0), 0, 0, 1.0);
        assert!(matches!(transport.send_mouse_event(&up).await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new();
        let mut events = transport.subscribe_events();
        assert!(matches!(transport.connect(&address).await, Err(TransportError::Io(_))));
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Error(_)));
    }
}
