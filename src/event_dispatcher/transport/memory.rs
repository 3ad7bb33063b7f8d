use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Channel, RemoteInputTransport, TransportEvent};
use crate::error::TransportError;
use crate::event_model::{FocusInputEvent, InputEvent, KeyboardInputEvent, MouseInputEvent, TouchInputEvent};
use crate::input_devices::lock;

#[derive(Debug, Default)]
struct Recorder {
    sent: Vec<(Instant, InputEvent)>,
    address: Option<String>,
    failures: usize,
    latency: Duration,
    refuse: bool,
}

/// 记录投递内容的传输层
///
/// 给 `--dry-run` 和测试用, 不会打开任何连接
#[derive(Debug)]
pub struct MemoryTransport {
    connected: AtomicBool,
    recorder: Mutex<Recorder>,
    events: broadcast::Sender<TransportEvent>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            connected: AtomicBool::new(false),
            recorder: Mutex::new(Recorder::default()),
            events,
        }
    }

    /// 接下来 `count` 次发送都返回 `Rejected`
    pub fn fail_next(&self, count: usize) {
        lock(&self.recorder).failures = count;
    }

    /// 每次发送前等待 `latency`
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.recorder).latency = latency;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.recorder).refuse = refuse;
    }

    /// 模拟对端断开
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    pub fn sent(&self) -> Vec<InputEvent> {
        lock(&self.recorder).sent.iter().map(|(_, event)| event.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        lock(&self.recorder).sent.iter().map(|(at, _)| *at).collect()
    }

    pub fn address(&self) -> Option<String> {
        lock(&self.recorder).address.clone()
    }

    async fn record(&self, event: InputEvent) -> Result<(), TransportError> {
        let latency = lock(&self.recorder).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut recorder = lock(&self.recorder);
        if recorder.failures > 0 {
            recorder.failures -= 1;
            return Err(TransportError::Rejected("injected failure".into()));
        }
        trace!(channel = ?Channel::of(&event), kind = %event.kind(), "recorded");
        recorder.sent.push((Instant::now(), event));
        Ok(())
    }
}

#[async_trait]
impl RemoteInputTransport for MemoryTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let refuse = {
            let mut recorder = lock(&self.recorder);
            recorder.address = Some(address.to_owned());
            recorder.refuse
        };
        if refuse {
            let _ = self.events.send(TransportEvent::Error(format!("connection to {address} refused")));
            return Err(TransportError::Rejected(format!("connection to {address} refused")));
        }
        if !self.connected.swap(true, Ordering::AcqRel) {
            debug!(address, "memory transport connected");
            let _ = self.events.send(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_connection();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send_mouse_event(&self, event: &MouseInputEvent) -> Result<(), TransportError> {
        self.record(event.clone().into()).await
    }

    async fn send_keyboard_event(&self, event: &KeyboardInputEvent) -> Result<(), TransportError> {
        self.record(event.clone().into()).await
    }

    async fn send_touch_event(&self, event: &TouchInputEvent) -> Result<(), TransportError> {
        self.record(event.clone().into()).await
    }

    async fn send_focus_event(&self, event: &FocusInputEvent) -> Result<(), TransportError> {
        self.record(event.clone().into()).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
