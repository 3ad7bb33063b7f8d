use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::event_model::channel::Subscribers;
use crate::event_model::raw::{RawInput, RawKeyEvent, RawKeyKind, RawPointerEvent, RawPointerKind, now_ms};
use crate::event_model::{FocusEventKind, FocusInputEvent, FocusReason, Rect, SurfaceId};
use crate::input_devices::keyboard::{KeyInterceptor, KeyRoute};
use crate::input_devices::shortcut::{self, Shortcut, ShortcutAction, ShortcutEvent, ShortcutOrigin, ShortcutTable};
use crate::input_devices::{ListenerId, RawInputSource, lock};
use crate::screen_overlay::focus_indicator::{
    FocusIndicator, IndicatorFrame, IndicatorStyle, OverlayBackend, TracingBackend,
};
use crate::screen_overlay::surface_info::FocusableInfo;
use crate::screen_overlay::surface_state::SurfaceState;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FocusConfig {
    pub indicator: IndicatorStyle,
    /// 先于内置 Tab/Enter/Escape/F5/F11 匹配
    pub shortcuts: Vec<Shortcut>,
}

struct ArbiterState {
    target: Option<Arc<dyn RawInputSource>>,
    global_listener: Option<ListenerId>,
    boundary: Option<Rect>,
    focused: bool,
    /// 最近一次指针按下是否落在边界内
    inside: bool,
    indicator: FocusIndicator,
    shortcuts: ShortcutTable,
    navigation: SurfaceState,
}

impl ArbiterState {
    fn boundary(&self) -> Option<Rect> {
        self.boundary
            .or_else(|| self.target.as_ref().map(|target| target.bounding_rect()))
    }

    fn target_id(&self) -> Option<SurfaceId> {
        self.target.as_ref().map(|target| target.surface_id())
    }
}

struct ArbiterInner {
    global: Arc<dyn RawInputSource>,
    state: Mutex<ArbiterState>,
    events: Subscribers<FocusInputEvent>,
    shortcuts: Subscribers<ShortcutEvent>,
}

/// 决定哪个表面接收输入
///
/// 同一时刻只有一个焦点会话; 会话期间独占焦点框和全局指针监听,
/// `init`/`teardown` 与 `request_focus`/`release_focus` 一一对应
pub struct FocusArbiter {
    inner: Arc<ArbiterInner>,
}

impl std::fmt::Debug for FocusArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("FocusArbiter")
            .field("target", &state.target_id())
            .field("focused", &state.focused)
            .field("inside", &state.inside)
            .finish()
    }
}

impl FocusArbiter {
    /// `global` 是整个窗口, 用来发现越过边界的指针按下
    pub fn new(global: Arc<dyn RawInputSource>, config: FocusConfig) -> Self {
        Self::with_backend(global, config, Arc::new(TracingBackend))
    }

    pub fn with_backend(
        global: Arc<dyn RawInputSource>,
        config: FocusConfig,
        backend: Arc<dyn OverlayBackend>,
    ) -> Self {
        let mut shortcuts = ShortcutTable::with_defaults(shortcut::focus_defaults());
        shortcuts.set_custom(config.shortcuts);
        Self {
            inner: Arc::new(ArbiterInner {
                global,
                state: Mutex::new(ArbiterState {
                    target: None,
                    global_listener: None,
                    boundary: None,
                    focused: false,
                    inside: false,
                    indicator: FocusIndicator::new(config.indicator, backend),
                    shortcuts,
                    navigation: SurfaceState::new(),
                }),
                events: Subscribers::new(),
                shortcuts: Subscribers::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FocusInputEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_shortcuts(&self) -> mpsc::UnboundedReceiver<ShortcutEvent> {
        self.inner.shortcuts.subscribe()
    }

    /// 给键盘捕获用的拦截器
    pub fn interceptor(&self) -> Arc<dyn KeyInterceptor> {
        self.inner.clone()
    }

    /// 开始监视 `surface` 但不获取焦点; 之后在边界内按下指针会获取焦点
    pub fn init(&self, surface: Arc<dyn RawInputSource>) {
        let mut state = lock(&self.inner.state);
        if state.target_id() == Some(surface.surface_id()) {
            return;
        }
        self.inner.teardown_locked(&mut state);
        self.inner.init_locked(&mut state, surface);
    }

    /// 结束焦点会话, 不发 blur
    pub fn teardown(&self) {
        let mut state = lock(&self.inner.state);
        self.inner.teardown_locked(&mut state);
    }

    /// 切换到新表面时隐式释放旧表面, 旧表面只丢失焦点状态
    pub fn request_focus(&self, surface: Arc<dyn RawInputSource>) {
        let mut state = lock(&self.inner.state);
        if state.target_id() == Some(surface.surface_id()) {
            if !state.focused {
                self.inner.focus_locked(&mut state, FocusReason::User);
            }
            return;
        }
        self.inner.teardown_locked(&mut state);
        self.inner.init_locked(&mut state, surface);
        self.inner.focus_locked(&mut state, FocusReason::User);
    }

    pub fn release_focus(&self) {
        let mut state = lock(&self.inner.state);
        self.inner.release_locked(&mut state, FocusReason::User);
    }

    pub fn set_boundary(&self, rect: Rect) {
        let mut state = lock(&self.inner.state);
        state.boundary = Some(rect);
        if state.focused {
            if let Some(id) = state.target_id() {
                state.indicator.install(id, rect);
            }
        }
    }

    pub fn boundary(&self) -> Option<Rect> {
        lock(&self.inner.state).boundary()
    }

    pub fn set_shortcuts(&self, shortcuts: Vec<Shortcut>) {
        lock(&self.inner.state).shortcuts.set_custom(shortcuts);
    }

    pub fn set_indicator_style(&self, style: IndicatorStyle) {
        lock(&self.inner.state).indicator.set_style(style);
    }

    /// 在边界内的可聚焦元素间循环, 两端回绕
    pub fn handle_tab_navigation(&self, forward: bool) -> Option<FocusableInfo> {
        let mut state = lock(&self.inner.state);
        self.inner.navigate_locked(&mut state, forward)
    }

    pub fn is_focused(&self) -> bool {
        lock(&self.inner.state).focused
    }

    /// 有焦点会话但目标没有焦点时, 捕获到的输入都不该往外发
    pub fn admits_input(&self) -> bool {
        !self.inner.is_blocking()
    }

    pub fn focused_surface(&self) -> Option<SurfaceId> {
        let state = lock(&self.inner.state);
        if state.focused { state.target_id() } else { None }
    }

    pub fn active_element(&self) -> Option<FocusableInfo> {
        lock(&self.inner.state).navigation.current().cloned()
    }

    pub fn indicator_frame(&self) -> Option<IndicatorFrame> {
        lock(&self.inner.state).indicator.frame().cloned()
    }
}

impl Drop for FocusArbiter {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl ArbiterInner {
    fn emit(&self, kind: FocusEventKind, reason: FocusReason, surface: SurfaceId) {
        debug!(?kind, ?reason, %surface, "focus event");
        self.events.emit(FocusInputEvent {
            kind,
            reason,
            surface,
            timestamp: now_ms(),
            validated: false,
        });
    }

    fn init_locked(self: &Arc<Self>, state: &mut ArbiterState, surface: Arc<dyn RawInputSource>) {
        let weak = Arc::downgrade(self);
        let listener = self.global.attach(Arc::new(move |raw: &RawInput| {
            if let (Some(inner), RawInput::Pointer(pointer)) = (weak.upgrade(), raw) {
                inner.handle_pointer(pointer);
            }
        }));
        debug!(surface = %surface.surface_id(), "focus session started");
        state.global_listener = Some(listener);
        state.target = Some(surface);
        state.inside = false;
    }

    fn teardown_locked(&self, state: &mut ArbiterState) {
        if let Some(listener) = state.global_listener.take() {
            self.global.detach(listener);
        }
        if let Some(target) = state.target.take() {
            target.set_focused(false);
            debug!(surface = %target.surface_id(), "focus session ended");
        }
        state.indicator.remove();
        state.navigation.clear();
        state.focused = false;
        state.inside = false;
        state.boundary = None;
    }

    fn focus_locked(&self, state: &mut ArbiterState, reason: FocusReason) {
        let (Some(target), Some(boundary)) = (state.target.clone(), state.boundary()) else {
            return;
        };
        state.focused = true;
        state.inside = true;
        target.set_focused(true);
        state.indicator.install(target.surface_id(), boundary);
        state.navigation.refresh(target.focusable_elements(), boundary);
        info!(surface = %target.surface_id(), ?reason, "focus acquired");
        self.emit(FocusEventKind::Focus, reason, target.surface_id());
    }

    /// 失去焦点但保留会话, 之后在边界内按下还能重新获取
    fn blur_locked(&self, state: &mut ArbiterState, reason: FocusReason) {
        if !state.focused {
            return;
        }
        state.focused = false;
        state.inside = false;
        state.indicator.remove();
        state.navigation.clear();
        if let Some(target) = &state.target {
            target.set_focused(false);
            info!(surface = %target.surface_id(), ?reason, "focus released");
            self.emit(FocusEventKind::Blur, reason, target.surface_id());
        }
    }

    fn release_locked(&self, state: &mut ArbiterState, reason: FocusReason) {
        self.blur_locked(state, reason);
        self.teardown_locked(state);
    }

    fn navigate_locked(&self, state: &mut ArbiterState, forward: bool) -> Option<FocusableInfo> {
        if !state.focused {
            return None;
        }
        let (target, boundary) = (state.target.clone()?, state.boundary()?);
        state.navigation.refresh(target.focusable_elements(), boundary);
        let next = state.navigation.step(forward).cloned();
        if let Some(element) = &next {
            debug!(id = element.id, name = ?element.name, forward, "tab navigation");
        }
        next
    }

    fn handle_pointer(&self, pointer: &RawPointerEvent) {
        let mut state = lock(&self.state);
        let (Some(id), Some(boundary)) = (state.target_id(), state.boundary()) else {
            return;
        };
        let inside = boundary.contains(pointer.position());

        match pointer.kind {
            RawPointerKind::Down => {
                if inside && !state.focused {
                    self.focus_locked(&mut state, FocusReason::Boundary);
                } else if inside && !state.inside {
                    state.inside = true;
                    self.emit(FocusEventKind::Enter, FocusReason::Boundary, id);
                } else if !inside && state.focused {
                    if state.inside {
                        self.emit(FocusEventKind::Leave, FocusReason::Boundary, id);
                    }
                    state.inside = false;
                }
            }
            RawPointerKind::Click if !inside && state.focused => {
                self.blur_locked(&mut state, FocusReason::Boundary);
            }
            _ => {}
        }
    }
}

impl KeyInterceptor for ArbiterInner {
    fn intercept(&self, key: &RawKeyEvent) -> KeyRoute {
        let mut state = lock(&self.state);
        if state.target.is_none() {
            return KeyRoute::Forward;
        }
        if !state.focused {
            return KeyRoute::Blocked;
        }
        if key.kind != RawKeyKind::Down {
            return KeyRoute::Forward;
        }
        let Some(hit) = state.shortcuts.find(&key.key, key.modifiers).cloned() else {
            return KeyRoute::Forward;
        };

        debug!(action = ?hit.action, key = %key.key, "focus shortcut");
        self.shortcuts.emit(ShortcutEvent {
            action: hit.action.clone(),
            key: key.key.clone(),
            modifiers: key.modifiers,
            origin: ShortcutOrigin::Focus,
            timestamp: key.timestamp,
        });
        if hit.action == ShortcutAction::CycleFocus {
            self.navigate_locked(&mut state, !key.modifiers.shift);
        }
        if hit.prevent_default {
            KeyRoute::Consumed
        } else {
            KeyRoute::Forward
        }
    }

    fn is_blocking(&self) -> bool {
        let state = lock(&self.state);
        state.target.is_some() && !state.focused
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::event_model::Modifiers;
    use crate::input_devices::VirtualSurface;

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn kinds(events: &[FocusInputEvent]) -> Vec<(FocusEventKind, FocusReason)> {
        events.iter().map(|e| (e.kind, e.reason)).collect()
    }

    fn setup() -> (Arc<VirtualSurface>, Arc<VirtualSurface>, FocusArbiter) {
        let window = VirtualSurface::new(Rect::new(0.0, 0.0, 1000.0, 800.0));
        let canvas = VirtualSurface::child_of(&window, Rect::new(100.0, 100.0, 400.0, 300.0));
        let arbiter = FocusArbiter::new(window.clone(), FocusConfig::default());
        (window, canvas, arbiter)
    }

    fn pointer(kind: RawPointerKind, x: f64, y: f64) -> RawInput {
        RawInput::Pointer(RawPointerEvent::new(kind, x, y))
    }

    fn key_down(name: &str, modifiers: Modifiers) -> RawKeyEvent {
        RawKeyEvent::new(RawKeyKind::Down, 0, name).with_modifiers(modifiers)
    }

    #[test]
    fn request_focus_installs_indicator() {
        let (window, canvas, arbiter) = setup();
        let mut rx = arbiter.subscribe();
        arbiter.request_focus(canvas.clone());

        assert!(arbiter.is_focused());
        assert!(canvas.is_focused());
        assert_eq!(arbiter.focused_surface(), Some(canvas.surface_id()));
        assert_eq!(window.listener_count(), 1);
        let frame = arbiter.indicator_frame().unwrap();
        assert_eq!(frame.rect, Rect::new(98.0, 98.0, 404.0, 304.0));
        assert_eq!(kinds(&drain(&mut rx)), vec![(FocusEventKind::Focus, FocusReason::User)]);
    }

    #[test]
    fn switching_surfaces_releases_previous_without_blur() {
        let (window, a, arbiter) = setup();
        let b = VirtualSurface::child_of(&window, Rect::new(600.0, 100.0, 200.0, 200.0));
        let mut rx = arbiter.subscribe();

        arbiter.request_focus(a.clone());
        arbiter.request_focus(b.clone());

        assert!(!a.is_focused());
        assert!(b.is_focused());
        assert_eq!(window.listener_count(), 1);
        let events = drain(&mut rx);
        assert_eq!(
            events.iter().map(|e| (e.kind, e.surface)).collect::<Vec<_>>(),
            vec![(FocusEventKind::Focus, a.surface_id()), (FocusEventKind::Focus, b.surface_id())]
        );
    }

    #[test]
    fn release_focus_blurs_and_tears_down() {
        let (window, canvas, arbiter) = setup();
        let mut rx = arbiter.subscribe();
        arbiter.request_focus(canvas.clone());
        arbiter.release_focus();

        assert!(!arbiter.is_focused());
        assert!(!canvas.is_focused());
        assert!(arbiter.indicator_frame().is_none());
        assert_eq!(window.listener_count(), 0);
        let events = drain(&mut rx);
        assert_eq!(events.last().map(|e| e.kind), Some(FocusEventKind::Blur));

        // 没有会话时再释放什么也不发
        arbiter.release_focus();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn pointer_outside_leaves_then_click_blurs() {
        let (window, canvas, arbiter) = setup();
        let mut rx = arbiter.subscribe();
        arbiter.request_focus(canvas.clone());

        window.emit(pointer(RawPointerKind::Down, 900.0, 700.0));
        assert!(arbiter.is_focused());
        window.emit(pointer(RawPointerKind::Click, 900.0, 700.0));
        assert!(!arbiter.is_focused());

        assert_eq!(
            kinds(&drain(&mut rx)),
            vec![
                (FocusEventKind::Focus, FocusReason::User),
                (FocusEventKind::Leave, FocusReason::Boundary),
                (FocusEventKind::Blur, FocusReason::Boundary),
            ]
        );

        // 会话还在, 回到边界内按下重新获取焦点
        assert_eq!(window.listener_count(), 1);
        assert!(arbiter.indicator_frame().is_none());
        assert_eq!(arbiter.interceptor().intercept(&key_down("a", Modifiers::NONE)), KeyRoute::Blocked);
        canvas.emit(pointer(RawPointerKind::Down, 150.0, 150.0));
        assert!(arbiter.is_focused());
        assert_eq!(kinds(&drain(&mut rx)), vec![(FocusEventKind::Focus, FocusReason::Boundary)]);
    }

    #[test]
    fn pointer_back_inside_emits_enter() {
        let (window, canvas, arbiter) = setup();
        let mut rx = arbiter.subscribe();
        arbiter.request_focus(canvas.clone());
        window.emit(pointer(RawPointerKind::Down, 900.0, 700.0));
        canvas.emit(pointer(RawPointerKind::Down, 150.0, 150.0));

        let events = kinds(&drain(&mut rx));
        assert_eq!(events.last(), Some(&(FocusEventKind::Enter, FocusReason::Boundary)));
        assert!(arbiter.is_focused());
    }

    #[test]
    fn pointer_down_inside_acquires_focus_after_init() {
        let (_window, canvas, arbiter) = setup();
        let mut rx = arbiter.subscribe();
        arbiter.init(canvas.clone());
        assert!(!arbiter.is_focused());

        canvas.emit(pointer(RawPointerKind::Down, 200.0, 200.0));
        assert!(arbiter.is_focused());
        assert_eq!(kinds(&drain(&mut rx)), vec![(FocusEventKind::Focus, FocusReason::Boundary)]);
    }

    #[test]
    fn custom_boundary_is_used_for_hit_testing() {
        let (window, canvas, arbiter) = setup();
        arbiter.init(canvas.clone());
        arbiter.set_boundary(Rect::new(0.0, 0.0, 50.0, 50.0));
        window.emit(pointer(RawPointerKind::Down, 200.0, 200.0));
        assert!(!arbiter.is_focused());
        window.emit(pointer(RawPointerKind::Down, 10.0, 10.0));
        assert!(arbiter.is_focused());
    }

    #[test]
    fn interceptor_routes_shortcuts() {
        let (_window, canvas, arbiter) = setup();
        let interceptor = arbiter.interceptor();
        let mut shortcuts = arbiter.subscribe_shortcuts();

        assert_eq!(interceptor.intercept(&key_down("a", Modifiers::NONE)), KeyRoute::Forward);
        arbiter.init(canvas.clone());
        assert_eq!(interceptor.intercept(&key_down("a", Modifiers::NONE)), KeyRoute::Blocked);

        arbiter.request_focus(canvas.clone());
        assert_eq!(interceptor.intercept(&key_down("F5", Modifiers::NONE)), KeyRoute::Consumed);
        assert_eq!(interceptor.intercept(&key_down("Enter", Modifiers::NONE)), KeyRoute::Forward);
        assert_eq!(interceptor.intercept(&key_down("a", Modifiers::NONE)), KeyRoute::Forward);

        let actions: Vec<_> = drain(&mut shortcuts).into_iter().map(|s| s.action).collect();
        assert_eq!(actions, vec![ShortcutAction::Refresh, ShortcutAction::Submit]);
    }

    #[test]
    fn tab_cycles_through_focusable_elements_inside_boundary() {
        let (_window, canvas, arbiter) = setup();
        canvas.add_focusable(FocusableInfo::new(1, Rect::new(110.0, 110.0, 50.0, 20.0)).named("user"));
        canvas.add_focusable(FocusableInfo::new(2, Rect::new(110.0, 140.0, 50.0, 20.0)).named("password"));
        canvas.add_focusable(FocusableInfo::new(3, Rect::new(900.0, 140.0, 50.0, 20.0)).named("outside"));
        canvas.add_focusable(FocusableInfo::new(4, Rect::new(110.0, 170.0, 50.0, 20.0)).disabled());

        assert!(arbiter.handle_tab_navigation(true).is_none());
        arbiter.request_focus(canvas.clone());

        let ids: Vec<u32> = (0..3)
            .filter_map(|_| arbiter.handle_tab_navigation(true).map(|e| e.id))
            .collect();
        assert_eq!(ids, vec![1, 2, 1]);

        // Shift+Tab 反向
        let route = arbiter
            .interceptor()
            .intercept(&key_down("Tab", Modifiers::NONE.with_shift()));
        assert_eq!(route, KeyRoute::Consumed);
        assert_eq!(arbiter.active_element().map(|e| e.id), Some(2));
    }

    #[test]
    fn input_is_admitted_only_while_session_target_is_focused() {
        let (window, canvas, arbiter) = setup();
        assert!(arbiter.admits_input());
        arbiter.request_focus(canvas.clone());
        assert!(arbiter.admits_input());
        assert!(!arbiter.interceptor().is_blocking());

        window.emit(pointer(RawPointerKind::Click, 900.0, 700.0));
        assert!(!arbiter.admits_input());
        assert!(arbiter.interceptor().is_blocking());

        arbiter.release_focus();
        assert!(arbiter.admits_input());
    }
}
