use std::fmt;

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use super::geometry::Point;

/// 输入表面的不透明句柄, 事件只引用它, 不拥有它
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventKind {
    Move,
    Down,
    Up,
    Click,
    DoubleClick,
    Drag,
    Scroll,
}

/// 鼠标按键编号, 与 DOM `MouseEvent.button` 一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(i16)]
pub enum MouseButton {
    Left = 0,
    Middle = 1,
    Right = 2,
    Back = 3,
    Forward = 4,
}

impl MouseButton {
    /// `buttons` 位掩码中对应的位 (左 1, 右 2, 中 4, 后退 8, 前进 16)
    pub const fn mask(self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Right => 2,
            MouseButton::Middle => 4,
            MouseButton::Back => 8,
            MouseButton::Forward => 16,
        }
    }
}

/// `button` 不适用时的取值
pub const NO_BUTTON: i16 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseInputEvent {
    pub kind: MouseEventKind,
    pub x: f64,
    pub y: f64,
    pub button: i16,
    pub buttons: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drag_start_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drag_start_y: Option<f64>,
    pub timestamp: f64,
    #[serde(default)]
    pub validated: bool,
}

impl MouseInputEvent {
    pub fn new(kind: MouseEventKind, position: Point, button: i16, buttons: u8, timestamp: f64) -> Self {
        Self {
            kind,
            x: position.x,
            y: position.y,
            button,
            buttons,
            delta_x: None,
            delta_y: None,
            drag_start_x: None,
            drag_start_y: None,
            timestamp,
            validated: false,
        }
    }

    pub fn with_drag_start(mut self, start: Point) -> Self {
        self.drag_start_x = Some(start.x);
        self.drag_start_y = Some(start.y);
        self
    }

    pub fn with_delta(mut self, delta_x: f64, delta_y: f64) -> Self {
        self.delta_x = Some(delta_x);
        self.delta_y = Some(delta_y);
        self
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyboardEventKind {
    Keydown,
    Keyup,
    Keypress,
    Repeat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        alt: false,
        shift: false,
        meta: false,
    };

    pub const fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }

    pub const fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub const fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn any(&self) -> bool {
        self.ctrl || self.alt || self.shift || self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardInputEvent {
    pub kind: KeyboardEventKind,
    pub key_code: u32,
    pub key: String,
    pub char_code: u32,
    pub modifiers: Modifiers,
    pub is_auto_repeat: bool,
    pub timestamp: f64,
    #[serde(default)]
    pub validated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TouchEventKind {
    Start,
    Move,
    End,
    Cancel,
    Gesture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GestureKind {
    Pinch,
    Zoom,
    Tap,
    DoubleTap,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchPoint {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub start_x: f64,
    pub start_y: f64,
}

impl TouchPoint {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn travel(&self) -> f64 {
        Point::new(self.start_x, self.start_y).distance_to(&self.position())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchInputEvent {
    pub kind: TouchEventKind,
    pub touches: Vec<TouchPoint>,
    pub changed_touches: Vec<TouchPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture_kind: Option<GestureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture_center: Option<Point>,
    pub timestamp: f64,
    #[serde(default)]
    pub validated: bool,
}

impl TouchInputEvent {
    pub fn gesture(
        kind: GestureKind,
        value: Option<f64>,
        center: Point,
        touches: Vec<TouchPoint>,
        timestamp: f64,
    ) -> Self {
        Self {
            kind: TouchEventKind::Gesture,
            touches,
            changed_touches: Vec::new(),
            gesture_kind: Some(kind),
            gesture_value: value,
            gesture_center: Some(center),
            timestamp,
            validated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusEventKind {
    Focus,
    Blur,
    Enter,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusReason {
    User,
    System,
    Boundary,
    Shortcut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusInputEvent {
    pub kind: FocusEventKind,
    pub reason: FocusReason,
    pub surface: SurfaceId,
    pub timestamp: f64,
    #[serde(default)]
    pub validated: bool,
}

/// 流水线里流动的统一事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputEvent {
    Mouse(MouseInputEvent),
    Keyboard(KeyboardInputEvent),
    Touch(TouchInputEvent),
    Focus(FocusInputEvent),
}

impl InputEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InputEvent::Mouse(e) => EventKind::Mouse(e.kind),
            InputEvent::Keyboard(e) => EventKind::Keyboard(e.kind),
            InputEvent::Touch(e) => EventKind::Touch(e.kind),
            InputEvent::Focus(e) => EventKind::Focus(e.kind),
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            InputEvent::Mouse(e) => e.timestamp,
            InputEvent::Keyboard(e) => e.timestamp,
            InputEvent::Touch(e) => e.timestamp,
            InputEvent::Focus(e) => e.timestamp,
        }
    }

    pub fn is_validated(&self) -> bool {
        match self {
            InputEvent::Mouse(e) => e.validated,
            InputEvent::Keyboard(e) => e.validated,
            InputEvent::Touch(e) => e.validated,
            InputEvent::Focus(e) => e.validated,
        }
    }

    pub(crate) fn mark_validated(&mut self) {
        match self {
            InputEvent::Mouse(e) => e.validated = true,
            InputEvent::Keyboard(e) => e.validated = true,
            InputEvent::Touch(e) => e.validated = true,
            InputEvent::Focus(e) => e.validated = true,
        }
    }
}

impl From<MouseInputEvent> for InputEvent {
    fn from(event: MouseInputEvent) -> Self {
        Self::Mouse(event)
    }
}

impl From<KeyboardInputEvent> for InputEvent {
    fn from(event: KeyboardInputEvent) -> Self {
        Self::Keyboard(event)
    }
}

impl From<TouchInputEvent> for InputEvent {
    fn from(event: TouchInputEvent) -> Self {
        Self::Touch(event)
    }
}

impl From<FocusInputEvent> for InputEvent {
    fn from(event: FocusInputEvent) -> Self {
        Self::Focus(event)
    }
}

/// 事件类型 + 子类型, 用作限流的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Mouse(MouseEventKind),
    Keyboard(KeyboardEventKind),
    Touch(TouchEventKind),
    Focus(FocusEventKind),
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Mouse(kind) => write!(f, "mouse.{kind:?}"),
            EventKind::Keyboard(kind) => write!(f, "keyboard.{kind:?}"),
            EventKind::Touch(kind) => write!(f, "touch.{kind:?}"),
            EventKind::Focus(kind) => write!(f, "focus.{kind:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_masks_follow_dom_layout() {
        assert_eq!(MouseButton::try_from(0).ok().map(MouseButton::mask), Some(1));
        assert_eq!(MouseButton::try_from(1).ok().map(MouseButton::mask), Some(4));
        assert_eq!(MouseButton::try_from(2).ok().map(MouseButton::mask), Some(2));
        assert!(MouseButton::try_from(7).is_err());
    }

    #[test]
    fn input_event_serializes_with_type_tag() {
        let event: InputEvent = MouseInputEvent::new(MouseEventKind::Down, Point::new(1.0, 2.0), 0, 1, 10.0).into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mouse");
        assert_eq!(json["kind"], "down");
        assert!(json.get("dragStartX").is_none());
        assert_eq!(event.kind().to_string(), "mouse.Down");
    }
}
