use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::shortcut::{self, Shortcut, ShortcutEvent, ShortcutOrigin, ShortcutTable};
use super::{Attachment, RawInputSource, lock};
use crate::event_model::channel::Subscribers;
use crate::event_model::raw::{CompositionPhase, RawInput, RawKeyEvent, RawKeyKind, now_ms};
use crate::event_model::{KeyboardEventKind, KeyboardInputEvent, Modifiers};

/// 首次重复前等待 `key_delay_ms` 的倍数
const INITIAL_REPEAT_FACTOR: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyboardConfig {
    /// 合成自动重复; 开启后平台自带的重复被吸收
    pub enable_auto_repeat: bool,
    pub key_delay_ms: u64,
    pub shortcuts: Vec<Shortcut>,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            enable_auto_repeat: true,
            key_delay_ms: 50,
            shortcuts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRoute {
    /// 交给键盘捕获继续处理
    Forward,
    /// 被本地快捷键吃掉
    Consumed,
    /// 目标表面没有焦点
    Blocked,
}

/// 键盘事件到达捕获处理器之前的拦截点
pub trait KeyInterceptor: Send + Sync {
    fn intercept(&self, key: &RawKeyEvent) -> KeyRoute;

    /// 当前是否拦下所有按键; 自动重复每次触发前都会问一遍
    fn is_blocking(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct KeyboardState {
    config: KeyboardConfig,
    shortcuts: ShortcutTable,
    attachment: Option<Attachment>,
    modifiers: Modifiers,
    pressed: HashSet<u32>,
    /// keydown 被拦截的键, 对应的 keyup 也不往外发
    consumed: HashSet<u32>,
    repeaters: HashMap<u32, JoinHandle<()>>,
    composing: bool,
    interceptor: Option<Arc<dyn KeyInterceptor>>,
}

impl KeyboardState {
    fn cancel_repeaters(&mut self) {
        for (_, task) in self.repeaters.drain() {
            task.abort();
        }
    }
}

struct KeyboardInner {
    state: Mutex<KeyboardState>,
    events: Subscribers<KeyboardInputEvent>,
    shortcuts: Subscribers<ShortcutEvent>,
}

/// 把原始键盘通知规范化为 [`KeyboardInputEvent`]
pub struct KeyboardCaptureHandler {
    inner: Arc<KeyboardInner>,
}

impl std::fmt::Debug for KeyboardCaptureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("KeyboardCaptureHandler")
            .field("attached", &state.attachment.is_some())
            .field("pressed", &state.pressed.len())
            .field("composing", &state.composing)
            .finish()
    }
}

impl KeyboardCaptureHandler {
    pub fn new(config: KeyboardConfig) -> Self {
        let mut shortcuts = ShortcutTable::with_defaults(shortcut::keyboard_defaults());
        shortcuts.set_custom(config.shortcuts.clone());
        Self {
            inner: Arc::new(KeyboardInner {
                state: Mutex::new(KeyboardState {
                    config,
                    shortcuts,
                    ..KeyboardState::default()
                }),
                events: Subscribers::new(),
                shortcuts: Subscribers::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<KeyboardInputEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_shortcuts(&self) -> mpsc::UnboundedReceiver<ShortcutEvent> {
        self.inner.shortcuts.subscribe()
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
        debug!(surface = %attachment.source.surface_id(), "keyboard capture attached");
        lock(&self.inner.state).attachment = Some(attachment);
    }

    pub fn detach(&self) {
        let attachment = {
            let mut state = lock(&self.inner.state);
            state.cancel_repeaters();
            state.pressed.clear();
            state.consumed.clear();
            state.composing = false;
            state.modifiers = Modifiers::NONE;
            state.attachment.take()
        };
        if let Some(attachment) = attachment {
            debug!(surface = %attachment.source.surface_id(), "keyboard capture detached");
            attachment.release();
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.inner.state).attachment.is_some()
    }

    pub fn set_shortcuts(&self, shortcuts: Vec<Shortcut>) {
        let mut state = lock(&self.inner.state);
        state.config.shortcuts = shortcuts.clone();
        state.shortcuts.set_custom(shortcuts);
    }

    pub fn set_interceptor(&self, interceptor: Option<Arc<dyn KeyInterceptor>>) {
        lock(&self.inner.state).interceptor = interceptor;
    }

    pub fn update_config(&self, update: impl FnOnce(&mut KeyboardConfig)) {
        let mut state = lock(&self.inner.state);
        update(&mut state.config);
        let custom = state.config.shortcuts.clone();
        state.shortcuts.set_custom(custom);
        if !state.config.enable_auto_repeat {
            state.cancel_repeaters();
        }
    }

    pub fn config(&self) -> KeyboardConfig {
        lock(&self.inner.state).config.clone()
    }

    pub fn modifiers(&self) -> Modifiers {
        lock(&self.inner.state).modifiers
    }

    pub fn pressed_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = lock(&self.inner.state).pressed.iter().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_composing(&self) -> bool {
        lock(&self.inner.state).composing
    }
}

impl Drop for KeyboardCaptureHandler {
    fn drop(&mut self) {
        self.detach();
    }
}

impl KeyboardInner {
    fn handle_raw(self: &Arc<Self>, raw: &RawInput) {
        match raw {
            RawInput::Composition { phase } => {
                let mut state = lock(&self.state);
                if state.attachment.is_none() {
                    return;
                }
                state.composing = *phase != CompositionPhase::End;
                debug!(?phase, "composition boundary");
            }
            RawInput::Key(key) => self.handle_key(key),
            _ => {}
        }
    }

    fn handle_key(self: &Arc<Self>, key: &RawKeyEvent) {
        let interceptor = {
            let mut state = lock(&self.state);
            if state.attachment.is_none() {
                return;
            }
            if key.is_composing || state.composing {
                trace!(key = %key.key, "key inside composition ignored");
                return;
            }
            state.modifiers = key.modifiers;
            state.interceptor.clone()
        };

        let route = interceptor.map_or(KeyRoute::Forward, |i| i.intercept(key));
        let mut state = lock(&self.state);
        if key.kind == RawKeyKind::Up {
            self.on_key_up(&mut state, key, route);
            return;
        }
        match route {
            KeyRoute::Forward => {}
            KeyRoute::Consumed => {
                if key.kind == RawKeyKind::Down {
                    state.consumed.insert(key.key_code);
                }
                return;
            }
            KeyRoute::Blocked => {
                trace!(key = %key.key, "key blocked, surface not focused");
                return;
            }
        }

        match key.kind {
            RawKeyKind::Down => self.on_key_down(&mut state, key),
            RawKeyKind::Press => {
                if state.consumed.contains(&key.key_code) {
                    return;
                }
                self.events
                    .emit(make_event(KeyboardEventKind::Keypress, key, key.modifiers, false));
            }
            RawKeyKind::Up => {}
        }
    }

    /// 不管路由如何都先清掉按下状态和重复任务;
    /// keydown 已经发出去的键一定配一个 keyup
    fn on_key_up(&self, state: &mut KeyboardState, key: &RawKeyEvent, route: KeyRoute) {
        let consumed = state.consumed.remove(&key.key_code);
        if let Some(task) = state.repeaters.remove(&key.key_code) {
            task.abort();
        }
        let delivered = state.pressed.remove(&key.key_code);
        if consumed || (route != KeyRoute::Forward && !delivered) {
            return;
        }
        self.events
            .emit(make_event(KeyboardEventKind::Keyup, key, key.modifiers, false));
    }

    fn on_key_down(self: &Arc<Self>, state: &mut KeyboardState, key: &RawKeyEvent) {
        let held = state.pressed.contains(&key.key_code);
        if key.repeat && !held {
            trace!(key = %key.key, "native repeat without a tracked keydown");
            return;
        }
        if held {
            if state.config.enable_auto_repeat {
                trace!(key = %key.key, "native repeat absorbed by synthesizer");
            } else {
                self.events
                    .emit(make_event(KeyboardEventKind::Repeat, key, key.modifiers, true));
            }
            return;
        }
        if state.consumed.contains(&key.key_code) {
            return;
        }

        if let Some(hit) = state.shortcuts.find(&key.key, key.modifiers) {
            debug!(action = ?hit.action, key = %key.key, "keyboard shortcut");
            self.shortcuts.emit(ShortcutEvent {
                action: hit.action.clone(),
                key: key.key.clone(),
                modifiers: key.modifiers,
                origin: ShortcutOrigin::Keyboard,
                timestamp: key.timestamp,
            });
            if hit.prevent_default {
                state.consumed.insert(key.key_code);
                return;
            }
        }

        state.pressed.insert(key.key_code);
        self.events
            .emit(make_event(KeyboardEventKind::Keydown, key, key.modifiers, false));
        if state.config.enable_auto_repeat && state.config.key_delay_ms > 0 {
            self.schedule_repeat(state, key);
        }
    }

    /// 每个键一个重复任务, keyup 时 O(1) 取消
    fn schedule_repeat(self: &Arc<Self>, state: &mut KeyboardState, key: &RawKeyEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let delay = Duration::from_millis(state.config.key_delay_ms);
        let weak = Arc::downgrade(self);
        let template = make_event(KeyboardEventKind::Repeat, key, key.modifiers, true);
        let key_code = key.key_code;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay * INITIAL_REPEAT_FACTOR).await;
            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let interceptor = lock(&inner.state).interceptor.clone();
                let blocked = interceptor.is_some_and(|i| i.is_blocking());
                {
                    let mut state = lock(&inner.state);
                    if !state.pressed.contains(&key_code) {
                        break;
                    }
                    let mut event = template.clone();
                    event.modifiers = state.modifiers;
                    event.timestamp = now_ms();
                    if blocked {
                        // 焦点没了, keyup 不会再送到这里, 就地松开
                        debug!(key = %event.key, "focus lost while key held, releasing");
                        state.pressed.remove(&key_code);
                        state.repeaters.remove(&key_code);
                        event.kind = KeyboardEventKind::Keyup;
                        event.is_auto_repeat = false;
                        inner.events.emit(event);
                        break;
                    }
                    inner.events.emit(event);
                }
                drop(inner);
                tokio::time::sleep(delay).await;
            }
        });
        if let Some(previous) = state.repeaters.insert(key_code, task) {
            previous.abort();
        }
    }
}

fn make_event(
    kind: KeyboardEventKind,
    key: &RawKeyEvent,
    modifiers: Modifiers,
    is_auto_repeat: bool,
) -> KeyboardInputEvent {
    KeyboardInputEvent {
        kind,
        key_code: key.key_code,
        key: key.key.clone(),
        char_code: key.char_code,
        modifiers,
        is_auto_repeat,
        timestamp: key.timestamp,
        validated: false,
    }
}
