use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Attachment, RawInputSource, lock};
use crate::event_model::channel::Subscribers;
use crate::event_model::raw::{RawInput, RawPointerEvent, RawPointerKind};
use crate::event_model::{MouseButton, MouseEventKind, MouseInputEvent, NO_BUTTON, Point, Rect};

/// 滚轮单轴单次最大增量
pub const MAX_SCROLL_DELTA: f64 = 100.0;

/// 合并后的移动与上一次发出的位置相差不超过它就丢弃
const MOVE_EPSILON: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MouseConfig {
    pub sensitivity: f64,
    /// 合成双击的时间窗口
    pub click_threshold_ms: u64,
    /// 超过这个位移的按下-释放不再算点击
    pub drag_threshold_px: f64,
    /// 移动合并窗口
    pub throttle_ms: u64,
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            click_threshold_ms: 300,
            drag_threshold_px: 5.0,
            throttle_ms: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    start: Point,
    /// 收到过移动才算真正的拖拽
    confirmed: bool,
    travel: f64,
}

#[derive(Debug, Clone, Copy)]
struct ClickRecord {
    at: Instant,
    button: i16,
    position: Point,
}

#[derive(Default)]
struct MouseState {
    config: MouseConfig,
    boundary: Option<Rect>,
    attachment: Option<Attachment>,
    pressed: u8,
    drag: Option<DragState>,
    pending_move: Option<MouseInputEvent>,
    flush_task: Option<JoinHandle<()>>,
    last_emitted_move: Option<Point>,
    last_click: Option<ClickRecord>,
    suppress_click: bool,
}

struct MouseInner {
    state: Mutex<MouseState>,
    events: Subscribers<MouseInputEvent>,
}

/// 把原始指针通知规范化为 [`MouseInputEvent`]
pub struct MouseCaptureHandler {
    inner: Arc<MouseInner>,
}

impl std::fmt::Debug for MouseCaptureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("MouseCaptureHandler")
            .field("attached", &state.attachment.is_some())
            .field("pressed", &state.pressed)
            .field("dragging", &state.drag.is_some())
            .finish()
    }
}

impl MouseCaptureHandler {
    pub fn new(config: MouseConfig) -> Self {
        Self {
            inner: Arc::new(MouseInner {
                state: Mutex::new(MouseState {
                    config,
                    ..MouseState::default()
                }),
                events: Subscribers::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MouseInputEvent> {
        self.inner.events.subscribe()
    }

    /// 重复 attach 会先释放上一次的登记
    pub fn attach(&self, surface: Arc<dyn RawInputSource>) {
        self.detach();
        let weak = Arc::downgrade(&self.inner);
        let attachment = Attachment::new(
            surface,
            Arc::new(move |raw: &RawInput| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_raw(raw);
                }
            }),
        );
        debug!(surface = %attachment.source.surface_id(), "mouse capture attached");
        lock(&self.inner.state).attachment = Some(attachment);
    }

    pub fn detach(&self) {
        let attachment = {
            let mut state = lock(&self.inner.state);
            if let Some(task) = state.flush_task.take() {
                task.abort();
            }
            state.pending_move = None;
            state.drag = None;
            state.pressed = 0;
            state.last_click = None;
            state.suppress_click = false;
            state.attachment.take()
        };
        if let Some(attachment) = attachment {
            debug!(surface = %attachment.source.surface_id(), "mouse capture detached");
            attachment.release();
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.inner.state).attachment.is_some()
    }

    pub fn set_boundary(&self, rect: Rect) {
        lock(&self.inner.state).boundary = Some(rect);
    }

    pub fn clear_boundary(&self) {
        lock(&self.inner.state).boundary = None;
    }

    pub fn update_config(&self, update: impl FnOnce(&mut MouseConfig)) {
        update(&mut lock(&self.inner.state).config);
    }

    pub fn config(&self) -> MouseConfig {
        lock(&self.inner.state).config.clone()
    }

    /// 当前按下的按键位掩码
    pub fn buttons(&self) -> u8 {
        lock(&self.inner.state).pressed
    }

    pub fn is_dragging(&self) -> bool {
        lock(&self.inner.state)
            .drag
            .is_some_and(|drag| drag.confirmed)
    }
}

impl Drop for MouseCaptureHandler {
    fn drop(&mut self) {
        self.detach();
    }
}

impl MouseInner {
    fn handle_raw(self: &Arc<Self>, raw: &RawInput) {
        let RawInput::Pointer(pointer) = raw else {
            return;
        };
        let mut state = lock(&self.state);
        let Some(attachment) = state.attachment.as_ref() else {
            return;
        };
        let surface_rect = attachment.source.bounding_rect();
        let position = state.map_position(pointer, surface_rect);

        match pointer.kind {
            RawPointerKind::Move => self.on_move(&mut state, position, pointer.timestamp),
            RawPointerKind::Down => self.on_down(&mut state, position, pointer),
            RawPointerKind::Up => self.on_up(&mut state, position, pointer),
            RawPointerKind::Click => self.on_click(&mut state, position, pointer),
            RawPointerKind::DoubleClick => {
                // 双击由 on_click 合成
                trace!("native double click absorbed");
            }
            RawPointerKind::Wheel => {
                self.flush_pending(&mut state);
                let delta_x = pointer.delta_x.clamp(-MAX_SCROLL_DELTA, MAX_SCROLL_DELTA);
                let delta_y = pointer.delta_y.clamp(-MAX_SCROLL_DELTA, MAX_SCROLL_DELTA);
                let event = MouseInputEvent::new(
                    MouseEventKind::Scroll,
                    position,
                    NO_BUTTON,
                    state.pressed,
                    pointer.timestamp,
                )
                .with_delta(delta_x, delta_y);
                self.events.emit(event);
            }
            RawPointerKind::ContextMenu => trace!("context menu suppressed"),
        }
    }

    fn on_move(self: &Arc<Self>, state: &mut MouseState, position: Point, timestamp: f64) {
        if let Some(drag) = state.drag.as_mut() {
            drag.confirmed = true;
            drag.travel = drag.travel.max(drag.start.distance_to(&position));
            let start = drag.start;
            let event = MouseInputEvent::new(MouseEventKind::Drag, position, 0, state.pressed, timestamp)
                .with_drag_start(start);
            self.events.emit(event);
            return;
        }

        state.pending_move = Some(MouseInputEvent::new(
            MouseEventKind::Move,
            position,
            NO_BUTTON,
            state.pressed,
            timestamp,
        ));
        if state.flush_task.is_some() {
            return;
        }

        let throttle = Duration::from_millis(state.config.throttle_ms);
        let runtime = tokio::runtime::Handle::try_current();
        match runtime {
            Ok(handle) if !throttle.is_zero() => {
                let weak = Arc::downgrade(self);
                state.flush_task = Some(handle.spawn(async move {
                    tokio::time::sleep(throttle).await;
                    if let Some(inner) = weak.upgrade() {
                        let mut state = lock(&inner.state);
                        state.flush_task = None;
                        inner.flush_pending(&mut state);
                    }
                }));
            }
            _ => self.flush_pending(state),
        }
    }

    fn on_down(&self, state: &mut MouseState, position: Point, pointer: &RawPointerEvent) {
        self.flush_pending(state);
        if let Ok(button) = MouseButton::try_from(pointer.button) {
            state.pressed |= button.mask();
        }
        self.events.emit(MouseInputEvent::new(
            MouseEventKind::Down,
            position,
            pointer.button,
            state.pressed,
            pointer.timestamp,
        ));
        if pointer.button == MouseButton::Left as i16 {
            state.drag = Some(DragState {
                start: position,
                confirmed: false,
                travel: 0.0,
            });
            state.suppress_click = false;
        }
    }

    fn on_up(&self, state: &mut MouseState, position: Point, pointer: &RawPointerEvent) {
        self.flush_pending(state);
        if let Ok(button) = MouseButton::try_from(pointer.button) {
            state.pressed &= !button.mask();
        }
        self.events.emit(MouseInputEvent::new(
            MouseEventKind::Up,
            position,
            pointer.button,
            state.pressed,
            pointer.timestamp,
        ));

        if pointer.button != MouseButton::Left as i16 {
            return;
        }
        if let Some(drag) = state.drag.take() {
            let travel = drag.travel.max(drag.start.distance_to(&position));
            state.suppress_click = travel > state.config.drag_threshold_px;
            if drag.confirmed {
                let event = MouseInputEvent::new(
                    MouseEventKind::Drag,
                    position,
                    0,
                    state.pressed,
                    pointer.timestamp,
                )
                .with_drag_start(drag.start);
                self.events.emit(event);
            }
        }
    }

    fn on_click(&self, state: &mut MouseState, position: Point, pointer: &RawPointerEvent) {
        self.flush_pending(state);
        if std::mem::take(&mut state.suppress_click) {
            trace!("click after drag suppressed");
            return;
        }
        self.events.emit(MouseInputEvent::new(
            MouseEventKind::Click,
            position,
            pointer.button,
            state.pressed,
            pointer.timestamp,
        ));

        let now = Instant::now();
        let window = Duration::from_millis(state.config.click_threshold_ms);
        let is_double = state.last_click.is_some_and(|last| {
            last.button == pointer.button
                && now.duration_since(last.at) <= window
                && last.position.distance_to(&position) <= state.config.drag_threshold_px
        });
        if is_double {
            state.last_click = None;
            self.events.emit(MouseInputEvent::new(
                MouseEventKind::DoubleClick,
                position,
                pointer.button,
                state.pressed,
                pointer.timestamp,
            ));
        } else {
            state.last_click = Some(ClickRecord {
                at: now,
                button: pointer.button,
                position,
            });
        }
    }

    /// 发出合并中的移动; 和上次发出的位置几乎相同则丢弃
    fn flush_pending(&self, state: &mut MouseState) {
        if let Some(task) = state.flush_task.take() {
            task.abort();
        }
        let Some(event) = state.pending_move.take() else {
            return;
        };
        let position = event.position();
        let changed = state.last_emitted_move.is_none_or(|last| {
            (last.x - position.x).abs() > MOVE_EPSILON || (last.y - position.y).abs() > MOVE_EPSILON
        });
        if changed {
            state.last_emitted_move = Some(position);
            self.events.emit(event);
        }
    }
}

impl MouseState {
    fn map_position(&self, pointer: &RawPointerEvent, surface_rect: Rect) -> Point {
        let sensitivity = self.config.sensitivity;
        let local = Point::new(
            (pointer.client_x - surface_rect.x) * sensitivity,
            (pointer.client_y - surface_rect.y) * sensitivity,
        );
        match self.boundary {
            Some(boundary) => boundary.clamp_local(local),
            None => local,
        }
    }
}
