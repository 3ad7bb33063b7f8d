use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::event_model::{FocusInputEvent, InputEvent, KeyboardInputEvent, MouseInputEvent, TouchInputEvent};

/// 换行分隔的 JSON 帧, 写到 TCP 连接上
pub mod tcp;

/// 只记录不发送, 可以注入失败和延迟
pub mod memory;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// 连接状态通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// 帧所属的通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Mouse,
    Keyboard,
    Touch,
    Focus,
}

impl Channel {
    pub fn of(event: &InputEvent) -> Self {
        match event {
            InputEvent::Mouse(_) => Channel::Mouse,
            InputEvent::Keyboard(_) => Channel::Keyboard,
            InputEvent::Touch(_) => Channel::Touch,
            InputEvent::Focus(_) => Channel::Focus,
        }
    }
}

/// 线上帧: `{"channel": "mouse", "event": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame<T> {
    pub channel: Channel,
    pub event: T,
}

/// 远端会话的持久连接
///
/// 连接的生命周期归调用方管; 编排器只持有引用并监听 [`TransportEvent`]
#[async_trait]
pub trait RemoteInputTransport: Send + Sync {
    /// 成功时广播 `Connected`, 失败时广播 `Error`
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn send_mouse_event(&self, event: &MouseInputEvent) -> Result<(), TransportError>;

    async fn send_keyboard_event(&self, event: &KeyboardInputEvent) -> Result<(), TransportError>;

    async fn send_touch_event(&self, event: &TouchInputEvent) -> Result<(), TransportError>;

    async fn send_focus_event(&self, event: &FocusInputEvent) -> Result<(), TransportError>;

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;

    /// 按事件类型分派到对应的 `send_*`
    async fn send(&self, event: &InputEvent) -> Result<(), TransportError> {
        match event {
            InputEvent::Mouse(mouse) => self.send_mouse_event(mouse).await,
            InputEvent::Keyboard(key) => self.send_keyboard_event(key).await,
            InputEvent::Touch(touch) => self.send_touch_event(touch).await,
            InputEvent::Focus(focus) => self.send_focus_event(focus).await,
        }
    }
}
