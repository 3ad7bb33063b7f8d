use serde::{Deserialize, Serialize};

use super::event::Modifiers;
use super::geometry::Point;

/// 当前时间 (毫秒, UNIX epoch), 原始通知缺省时间戳用
pub fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawPointerKind {
    Down,
    Up,
    Move,
    Click,
    DoubleClick,
    Wheel,
    ContextMenu,
}

/// 原始指针通知, 坐标是视口坐标 (`clientX/clientY`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPointerEvent {
    pub kind: RawPointerKind,
    pub client_x: f64,
    pub client_y: f64,
    #[serde(default)]
    pub button: i16,
    #[serde(default)]
    pub delta_x: f64,
    #[serde(default)]
    pub delta_y: f64,
    #[serde(default)]
    pub timestamp: f64,
}

impl RawPointerEvent {
    pub fn new(kind: RawPointerKind, client_x: f64, client_y: f64) -> Self {
        Self {
            kind,
            client_x,
            client_y,
            button: 0,
            delta_x: 0.0,
            delta_y: 0.0,
            timestamp: now_ms(),
        }
    }

    pub fn with_button(mut self, button: i16) -> Self {
        self.button = button;
        self
    }

    pub fn with_delta(mut self, delta_x: f64, delta_y: f64) -> Self {
        self.delta_x = delta_x;
        self.delta_y = delta_y;
        self
    }

    pub fn position(&self) -> Point {
        Point::new(self.client_x, self.client_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawKeyKind {
    Down,
    Up,
    Press,
}

/// 原始键盘通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawKeyEvent {
    pub kind: RawKeyKind,
    pub key_code: u32,
    pub key: String,
    #[serde(default)]
    pub char_code: u32,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// 平台自带的自动重复标记
    #[serde(default)]
    pub repeat: bool,
    /// 输入法组合中
    #[serde(default)]
    pub is_composing: bool,
    #[serde(default)]
    pub timestamp: f64,
}

impl RawKeyEvent {
    pub fn new(kind: RawKeyKind, key_code: u32, key: impl Into<String>) -> Self {
        Self {
            kind,
            key_code,
            key: key.into(),
            char_code: 0,
            modifiers: Modifiers::NONE,
            repeat: false,
            is_composing: false,
            timestamp: now_ms(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn repeated(mut self) -> Self {
        self.repeat = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositionPhase {
    Start,
    Update,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawTouchKind {
    Start,
    Move,
    End,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTouchPoint {
    pub id: u32,
    pub client_x: f64,
    pub client_y: f64,
}

impl RawTouchPoint {
    pub const fn new(id: u32, client_x: f64, client_y: f64) -> Self {
        Self {
            id,
            client_x,
            client_y,
        }
    }
}

/// 原始触摸通知: `touches` 是仍在屏幕上的点, `changed` 是本次变化的点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTouchEvent {
    pub kind: RawTouchKind,
    #[serde(default)]
    pub touches: Vec<RawTouchPoint>,
    #[serde(default)]
    pub changed: Vec<RawTouchPoint>,
    #[serde(default)]
    pub timestamp: f64,
}

impl RawTouchEvent {
    pub fn new(kind: RawTouchKind, touches: Vec<RawTouchPoint>, changed: Vec<RawTouchPoint>) -> Self {
        Self {
            kind,
            touches,
            changed,
            timestamp: now_ms(),
        }
    }
}

/// `RawInputSource` 发给监听者的全部原始通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum RawInput {
    Pointer(RawPointerEvent),
    Key(RawKeyEvent),
    Composition { phase: CompositionPhase },
    Touch(RawTouchEvent),
}

impl RawInput {
    pub fn timestamp_mut(&mut self) -> Option<&mut f64> {
        match self {
            RawInput::Pointer(e) => Some(&mut e.timestamp),
            RawInput::Key(e) => Some(&mut e.timestamp),
            RawInput::Touch(e) => Some(&mut e.timestamp),
            RawInput::Composition { .. } => None,
        }
    }
}
