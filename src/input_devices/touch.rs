use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Attachment, RawInputSource, lock};
use crate::event_model::channel::Subscribers;
use crate::event_model::raw::{RawInput, RawTouchEvent, RawTouchKind, RawTouchPoint, now_ms};
use crate::event_model::{GestureKind, Point, Rect, TouchEventKind, TouchInputEvent, TouchPoint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TouchConfig {
    /// 两指距离变化超过它才进入捏合
    pub gesture_threshold_px: f64,
    pub pinch_sensitivity: f64,
    /// 单指位移超过它就不再算点击
    pub swipe_threshold_px: f64,
    /// 单指按住超过它就不再算点击
    pub tap_threshold_ms: u64,
    pub double_tap_threshold_ms: u64,
    pub enable_gestures: bool,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            gesture_threshold_px: 10.0,
            pinch_sensitivity: 1.0,
            swipe_threshold_px: 50.0,
            tap_threshold_ms: 200,
            double_tap_threshold_ms: 300,
            enable_gestures: true,
        }
    }
}

/// 第二个触点出现时记录的初始状态
#[derive(Debug, Clone, Copy, PartialEq)]
struct PinchAnchor {
    distance: f64,
    angle: f64,
    center: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GesturePhase {
    #[default]
    Idle,
    SingleTouch,
    TwoTouch,
    Pinching,
}

#[derive(Default)]
struct TouchState {
    config: TouchConfig,
    attachment: Option<Attachment>,
    points: BTreeMap<u32, TouchPoint>,
    phase: GesturePhase,
    anchor: Option<PinchAnchor>,
    last_scale: f64,
    last_center: Point,
    tap_count: u32,
    tap_timer: Option<JoinHandle<()>>,
    tap_started: Option<Instant>,
    tap_valid: bool,
    tap_center: Point,
}

impl TouchState {
    fn touches(&self) -> Vec<TouchPoint> {
        self.points.values().copied().collect()
    }

    fn first_two(&self) -> Option<(TouchPoint, TouchPoint)> {
        let mut iter = self.points.values().copied();
        Some((iter.next()?, iter.next()?))
    }

    fn reset_taps(&mut self) {
        if let Some(timer) = self.tap_timer.take() {
            timer.abort();
        }
        self.tap_count = 0;
        self.tap_started = None;
        self.tap_valid = false;
    }

    fn reset_gesture(&mut self) {
        self.phase = GesturePhase::Idle;
        self.anchor = None;
        self.last_scale = 1.0;
        self.reset_taps();
    }
}

struct TouchInner {
    state: Mutex<TouchState>,
    events: Subscribers<TouchInputEvent>,
}

/// 把原始触摸通知规范化为 [`TouchInputEvent`], 并识别捏合/点击手势
///
/// 状态机: `Idle -> SingleTouch -> TwoTouch -> Pinching`,
/// 触点少于两个时结束捏合并发出 `zoom`
pub struct TouchCaptureHandler {
    inner: Arc<TouchInner>,
}

impl std::fmt::Debug for TouchCaptureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("TouchCaptureHandler")
            .field("attached", &state.attachment.is_some())
            .field("points", &state.points.len())
            .field("phase", &state.phase)
            .finish()
    }
}

impl TouchCaptureHandler {
    pub fn new(config: TouchConfig) -> Self {
        Self {
            inner: Arc::new(TouchInner {
                state: Mutex::new(TouchState {
                    config,
                    last_scale: 1.0,
                    ..TouchState::default()
                }),
                events: Subscribers::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TouchInputEvent> {
        self.inner.events.subscribe()
    }

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
        debug!(surface = %attachment.source.surface_id(), "touch capture attached");
        lock(&self.inner.state).attachment = Some(attachment);
    }

    pub fn detach(&self) {
        let attachment = {
            let mut state = lock(&self.inner.state);
            state.points.clear();
            state.reset_gesture();
            state.attachment.take()
        };
        if let Some(attachment) = attachment {
            debug!(surface = %attachment.source.surface_id(), "touch capture detached");
            attachment.release();
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.inner.state).attachment.is_some()
    }

    pub fn update_config(&self, update: impl FnOnce(&mut TouchConfig)) {
        let mut state = lock(&self.inner.state);
        update(&mut state.config);
        if !state.config.enable_gestures {
            state.reset_gesture();
        }
    }

    pub fn config(&self) -> TouchConfig {
        lock(&self.inner.state).config.clone()
    }

    pub fn phase(&self) -> GesturePhase {
        lock(&self.inner.state).phase
    }

    pub fn active_touches(&self) -> Vec<TouchPoint> {
        lock(&self.inner.state).touches()
    }
}

impl Drop for TouchCaptureHandler {
    fn drop(&mut self) {
        self.detach();
    }
}

fn to_local(point: &RawTouchPoint, rect: Rect) -> Point {
    Point::new(point.client_x - rect.x, point.client_y - rect.y)
}

impl TouchInner {
    fn handle_raw(self: &Arc<Self>, raw: &RawInput) {
        let RawInput::Touch(touch) = raw else {
            return;
        };
        let mut state = lock(&self.state);
        let Some(attachment) = state.attachment.as_ref() else {
            return;
        };
        let rect = attachment.source.bounding_rect();

        match touch.kind {
            RawTouchKind::Start => self.on_start(&mut state, touch, rect),
            RawTouchKind::Move => self.on_move(&mut state, touch, rect),
            RawTouchKind::End => self.on_end(&mut state, touch, rect),
            RawTouchKind::Cancel => {
                let changed = state.touches();
                state.points.clear();
                state.reset_gesture();
                self.events.emit(TouchInputEvent {
                    kind: TouchEventKind::Cancel,
                    touches: Vec::new(),
                    changed_touches: changed,
                    gesture_kind: None,
                    gesture_value: None,
                    gesture_center: None,
                    timestamp: touch.timestamp,
                    validated: false,
                });
            }
        }
    }

    fn emit_plain(&self, state: &TouchState, kind: TouchEventKind, changed: Vec<TouchPoint>, timestamp: f64) {
        self.events.emit(TouchInputEvent {
            kind,
            touches: state.touches(),
            changed_touches: changed,
            gesture_kind: None,
            gesture_value: None,
            gesture_center: None,
            timestamp,
            validated: false,
        });
    }

    fn emit_gesture(&self, state: &TouchState, kind: GestureKind, value: Option<f64>, center: Point, timestamp: f64) {
        debug!(?kind, ?value, x = center.x, y = center.y, "touch gesture");
        self.events
            .emit(TouchInputEvent::gesture(kind, value, center, state.touches(), timestamp));
    }

    fn on_start(self: &Arc<Self>, state: &mut TouchState, touch: &RawTouchEvent, rect: Rect) {
        let mut changed = Vec::with_capacity(touch.changed.len());
        for raw in &touch.changed {
            let position = to_local(raw, rect);
            let point = TouchPoint {
                id: raw.id,
                x: position.x,
                y: position.y,
                start_x: position.x,
                start_y: position.y,
            };
            state.points.insert(raw.id, point);
            changed.push(point);
        }
        self.emit_plain(state, TouchEventKind::Start, changed, touch.timestamp);

        if !state.config.enable_gestures {
            return;
        }
        match state.points.len() {
            1 => {
                state.phase = GesturePhase::SingleTouch;
                let center = state.points.values().next().map(TouchPoint::position).unwrap_or_default();
                self.register_tap(state, center, touch.timestamp);
            }
            2 => {
                // 两指不是点击
                state.reset_taps();
                if let Some((a, b)) = state.first_two() {
                    let (pa, pb) = (a.position(), b.position());
                    state.anchor = Some(PinchAnchor {
                        distance: pa.distance_to(&pb),
                        angle: pa.angle_to(&pb),
                        center: pa.midpoint(&pb),
                    });
                    state.last_scale = 1.0;
                    state.last_center = pa.midpoint(&pb);
                    state.phase = GesturePhase::TwoTouch;
                }
            }
            _ => {}
        }
    }

    fn register_tap(self: &Arc<Self>, state: &mut TouchState, center: Point, timestamp: f64) {
        state.tap_count += 1;
        state.tap_started = Some(Instant::now());
        state.tap_valid = true;
        state.tap_center = center;

        if state.tap_count >= 2 {
            state.reset_taps();
            self.emit_gesture(state, GestureKind::DoubleTap, None, center, timestamp);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let window = Duration::from_millis(state.config.double_tap_threshold_ms);
        let weak = Arc::downgrade(self);
        state.tap_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                inner.tap_timer_fired();
            }
        }));
    }

    fn tap_timer_fired(&self) {
        let mut state = lock(&self.state);
        state.tap_timer = None;
        let is_tap = state.tap_count == 1 && state.tap_valid && state.points.is_empty();
        let center = state.tap_center;
        state.reset_taps();
        if is_tap {
            self.emit_gesture(&state, GestureKind::Tap, None, center, now_ms());
        }
    }

    fn on_move(&self, state: &mut TouchState, touch: &RawTouchEvent, rect: Rect) {
        let mut changed = Vec::with_capacity(touch.changed.len());
        for raw in &touch.changed {
            let position = to_local(raw, rect);
            if let Some(point) = state.points.get_mut(&raw.id) {
                point.x = position.x;
                point.y = position.y;
                changed.push(*point);
            }
        }
        self.emit_plain(state, TouchEventKind::Move, changed, touch.timestamp);

        if !state.config.enable_gestures {
            return;
        }
        match state.phase {
            GesturePhase::SingleTouch => {
                let swipe = state.config.swipe_threshold_px;
                if state.points.values().any(|p| p.travel() > swipe) {
                    state.tap_valid = false;
                }
            }
            GesturePhase::TwoTouch | GesturePhase::Pinching => self.update_pinch(state, touch.timestamp),
            GesturePhase::Idle => {}
        }
    }

    fn update_pinch(&self, state: &mut TouchState, timestamp: f64) {
        let (Some(anchor), Some((a, b))) = (state.anchor, state.first_two()) else {
            return;
        };
        if anchor.distance <= f64::EPSILON {
            return;
        }
        let (pa, pb) = (a.position(), b.position());
        let distance = pa.distance_to(&pb);
        let center = pa.midpoint(&pb);

        if state.phase == GesturePhase::TwoTouch {
            if (distance - anchor.distance).abs() <= state.config.gesture_threshold_px {
                return;
            }
            state.phase = GesturePhase::Pinching;
        }

        let raw_scale = distance / anchor.distance;
        let scale = 1.0 + (raw_scale - 1.0) * state.config.pinch_sensitivity;
        trace!(
            scale,
            rotation = pa.angle_to(&pb) - anchor.angle,
            drift = anchor.center.distance_to(&center),
            "pinch update"
        );
        state.last_scale = scale;
        state.last_center = center;
        self.emit_gesture(state, GestureKind::Pinch, Some(scale), center, timestamp);
    }

    fn on_end(&self, state: &mut TouchState, touch: &RawTouchEvent, rect: Rect) {
        let mut changed = Vec::with_capacity(touch.changed.len());
        for raw in &touch.changed {
            if let Some(mut point) = state.points.remove(&raw.id) {
                let position = to_local(raw, rect);
                point.x = position.x;
                point.y = position.y;
                changed.push(point);
            }
        }
        self.emit_plain(state, TouchEventKind::End, changed.clone(), touch.timestamp);

        if !state.config.enable_gestures {
            return;
        }
        let remaining = state.points.len();
        let next = if remaining == 1 {
            GesturePhase::SingleTouch
        } else {
            GesturePhase::Idle
        };
        match state.phase {
            GesturePhase::Pinching if remaining < 2 => {
                let (scale, center) = (state.last_scale, state.last_center);
                state.phase = next;
                state.anchor = None;
                self.emit_gesture(state, GestureKind::Zoom, Some(scale), center, touch.timestamp);
            }
            GesturePhase::TwoTouch if remaining < 2 => {
                state.phase = next;
                state.anchor = None;
            }
            GesturePhase::SingleTouch if remaining == 0 => {
                state.phase = GesturePhase::Idle;
                let held_too_long = state.tap_started.is_some_and(|started| {
                    started.elapsed() > Duration::from_millis(state.config.tap_threshold_ms)
                });
                let swipe = state.config.swipe_threshold_px;
                let moved_too_far = changed.iter().any(|p| p.travel() > swipe);
                if held_too_long || moved_too_far {
                    state.reset_taps();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::input_devices::VirtualSurface;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TouchInputEvent>) -> Vec<TouchInputEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn gestures(events: &[TouchInputEvent]) -> Vec<(GestureKind, Option<f64>)> {
        events
            .iter()
            .filter_map(|e| e.gesture_kind.map(|kind| (kind, e.gesture_value)))
            .collect()
    }

    fn touch(kind: RawTouchKind, touches: &[RawTouchPoint], changed: &[RawTouchPoint]) -> RawInput {
        RawInput::Touch(RawTouchEvent::new(kind, touches.to_vec(), changed.to_vec()))
    }

    fn setup() -> (Arc<VirtualSurface>, TouchCaptureHandler, mpsc::UnboundedReceiver<TouchInputEvent>) {
        let surface = VirtualSurface::new(Rect::new(0.0, 0.0, 1000.0, 1000.0));
        let handler = TouchCaptureHandler::new(TouchConfig::default());
        let rx = handler.subscribe();
        handler.attach(surface.clone());
        (surface, handler, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn pinch_reports_scale_and_terminal_zoom() {
        let (surface, handler, mut rx) = setup();
        let a = RawTouchPoint::new(1, 100.0, 200.0);
        let b = RawTouchPoint::new(2, 200.0, 200.0);
        surface.emit(touch(RawTouchKind::Start, &[a], &[a]));
        surface.emit(touch(RawTouchKind::Start, &[a, b], &[b]));
        assert_eq!(handler.phase(), GesturePhase::TwoTouch);

        let a2 = RawTouchPoint::new(1, 75.0, 200.0);
        let b2 = RawTouchPoint::new(2, 225.0, 200.0);
        surface.emit(touch(RawTouchKind::Move, &[a2, b2], &[a2, b2]));
        assert_eq!(handler.phase(), GesturePhase::Pinching);

        surface.emit(touch(RawTouchKind::End, &[], &[a2, b2]));
        assert_eq!(handler.phase(), GesturePhase::Idle);

        let events = drain(&mut rx);
        let pinch = events
            .iter()
            .find(|e| e.gesture_kind == Some(GestureKind::Pinch))
            .unwrap();
        assert!((pinch.gesture_value.unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(pinch.gesture_center, Some(Point::new(150.0, 200.0)));

        assert_eq!(
            gestures(&events),
            vec![(GestureKind::Pinch, Some(1.5)), (GestureKind::Zoom, Some(1.5))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn small_distance_change_does_not_pinch() {
        let (surface, handler, mut rx) = setup();
        let a = RawTouchPoint::new(1, 100.0, 100.0);
        let b = RawTouchPoint::new(2, 200.0, 100.0);
        surface.emit(touch(RawTouchKind::Start, &[a, b], &[a, b]));
        let b2 = RawTouchPoint::new(2, 205.0, 100.0);
        surface.emit(touch(RawTouchKind::Move, &[a, b2], &[b2]));
        assert_eq!(handler.phase(), GesturePhase::TwoTouch);

        surface.emit(touch(RawTouchKind::End, &[a], &[b2]));
        assert_eq!(handler.phase(), GesturePhase::SingleTouch);
        assert!(gestures(&drain(&mut rx)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_tap_fires_after_double_tap_window() {
        let (surface, _handler, mut rx) = setup();
        let p = RawTouchPoint::new(7, 10.0, 20.0);
        surface.emit(touch(RawTouchKind::Start, &[p], &[p]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        surface.emit(touch(RawTouchKind::End, &[], &[p]));
        assert!(gestures(&drain(&mut rx)).is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let events = drain(&mut rx);
        assert_eq!(gestures(&events), vec![(GestureKind::Tap, None)]);
        assert_eq!(events[0].gesture_center, Some(Point::new(10.0, 20.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn two_quick_taps_make_a_double_tap() {
        let (surface, _handler, mut rx) = setup();
        let p = RawTouchPoint::new(1, 10.0, 10.0);
        surface.emit(touch(RawTouchKind::Start, &[p], &[p]));
        surface.emit(touch(RawTouchKind::End, &[], &[p]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        surface.emit(touch(RawTouchKind::Start, &[p], &[p]));
        surface.emit(touch(RawTouchKind::End, &[], &[p]));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(gestures(&drain(&mut rx)), vec![(GestureKind::DoubleTap, None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_press_is_not_a_tap() {
        let (surface, _handler, mut rx) = setup();
        let p = RawTouchPoint::new(1, 10.0, 10.0);
        surface.emit(touch(RawTouchKind::Start, &[p], &[p]));
        tokio::time::sleep(Duration::from_millis(250)).await;
        surface.emit(touch(RawTouchKind::End, &[], &[p]));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(gestures(&drain(&mut rx)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_touches_and_gesture_state() {
        let (surface, handler, mut rx) = setup();
        let a = RawTouchPoint::new(1, 100.0, 100.0);
        let b = RawTouchPoint::new(2, 200.0, 100.0);
        surface.emit(touch(RawTouchKind::Start, &[a, b], &[a, b]));
        surface.emit(touch(RawTouchKind::Cancel, &[], &[]));

        assert!(handler.active_touches().is_empty());
        assert_eq!(handler.phase(), GesturePhase::Idle);
        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.kind, TouchEventKind::Cancel);
        assert_eq!(last.changed_touches.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gestures_can_be_disabled() {
        let (surface, handler, mut rx) = setup();
        handler.update_config(|config| config.enable_gestures = false);
        let p = RawTouchPoint::new(1, 10.0, 10.0);
        surface.emit(touch(RawTouchKind::Start, &[p], &[p]));
        surface.emit(touch(RawTouchKind::End, &[], &[p]));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TouchEventKind::Start, TouchEventKind::End]);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_points_are_surface_relative_and_keep_start() {
        let surface = VirtualSurface::new(Rect::new(50.0, 50.0, 500.0, 500.0));
        let handler = TouchCaptureHandler::new(TouchConfig::default());
        let mut rx = handler.subscribe();
        handler.attach(surface.clone());

        let p = RawTouchPoint::new(3, 60.0, 70.0);
        let moved = RawTouchPoint::new(3, 90.0, 70.0);
        surface.emit(touch(RawTouchKind::Start, &[p], &[p]));
        surface.emit(touch(RawTouchKind::Move, &[moved], &[moved]));

        let events = drain(&mut rx);
        let point = events[1].touches[0];
        assert_eq!((point.x, point.y, point.start_x, point.start_y), (40.0, 20.0, 10.0, 20.0));
    }
}
