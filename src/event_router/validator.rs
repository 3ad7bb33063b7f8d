use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ValidationError;
use crate::event_model::{
    EventKind, InputEvent, KeyboardInputEvent, MouseButton, MouseEventKind, MouseInputEvent, NO_BUTTON, TouchEventKind,
    TouchInputEvent,
};

/// 结构校验 + 按事件类型的固定窗口限流
///
/// 每种事件在一个 `rate_limit_ms` 窗口内最多放行一个, 窗口内的后续事件直接拒绝
#[derive(Debug)]
pub struct EventValidator {
    window: Duration,
    windows: HashMap<EventKind, Instant>,
}

impl EventValidator {
    pub fn new(rate_limit_ms: u64) -> Self {
        Self {
            window: Duration::from_millis(rate_limit_ms),
            windows: HashMap::new(),
        }
    }

    /// 通过时置上 `validated`
    pub fn validate(&self, event: &mut InputEvent) -> Result<(), ValidationError> {
        let timestamp = event.timestamp();
        if !timestamp.is_finite() || timestamp < 0.0 {
            return Err(ValidationError::Timestamp(timestamp));
        }
        match event {
            InputEvent::Mouse(mouse) => validate_mouse(mouse)?,
            InputEvent::Keyboard(key) => validate_keyboard(key)?,
            InputEvent::Touch(touch) => validate_touch(touch)?,
            InputEvent::Focus(_) => {}
        }
        event.mark_validated();
        Ok(())
    }

    pub fn check_rate_limit(&mut self, kind: EventKind) -> bool {
        self.check_rate_limit_at(kind, Instant::now())
    }

    fn check_rate_limit_at(&mut self, kind: EventKind, now: Instant) -> bool {
        if self.window.is_zero() {
            return true;
        }
        match self.windows.get(&kind) {
            Some(opened) if now.duration_since(*opened) < self.window => false,
            _ => {
                self.windows.insert(kind, now);
                true
            }
        }
    }

    pub fn update_config(&mut self, rate_limit_ms: u64) {
        self.window = Duration::from_millis(rate_limit_ms);
    }

    pub fn reset(&mut self) {
        self.windows.clear();
    }
}

fn validate_mouse(event: &MouseInputEvent) -> Result<(), ValidationError> {
    if !event.position().is_finite() {
        return Err(ValidationError::Coordinates { x: event.x, y: event.y });
    }
    if event.button != NO_BUTTON && MouseButton::try_from(event.button).is_err() {
        return Err(ValidationError::Button(event.button));
    }
    match event.kind {
        MouseEventKind::Scroll => match (event.delta_x, event.delta_y) {
            (Some(dx), Some(dy)) if dx.is_finite() && dy.is_finite() => {}
            _ => return Err(ValidationError::ScrollDelta),
        },
        MouseEventKind::Drag => match (event.drag_start_x, event.drag_start_y) {
            (Some(sx), Some(sy)) if sx.is_finite() && sy.is_finite() => {}
            _ => return Err(ValidationError::DragStart),
        },
        _ => {}
    }
    Ok(())
}

fn validate_keyboard(event: &KeyboardInputEvent) -> Result<(), ValidationError> {
    if event.key.is_empty() && event.key_code == 0 {
        return Err(ValidationError::KeyIdentity);
    }
    Ok(())
}

fn validate_touch(event: &TouchInputEvent) -> Result<(), ValidationError> {
    for point in event.touches.iter().chain(event.changed_touches.iter()) {
        let finite = [point.x, point.y, point.start_x, point.start_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(ValidationError::TouchPoint { id: point.id });
        }
    }
    if event.kind != TouchEventKind::Gesture {
        return Ok(());
    }
    if event.gesture_kind.is_none() {
        return Err(ValidationError::Gesture("gesture event without a gesture kind"));
    }
    if let Some(value) = event.gesture_value {
        if !value.is_finite() || value <= 0.0 {
            return Err(ValidationError::Gesture("gesture value must be finite and positive"));
        }
    }
    if event.gesture_center.is_some_and(|c| !c.is_finite()) {
        return Err(ValidationError::Gesture("gesture center is not finite"));
    }
    Ok(())
}
