use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::metrics::InputMetrics;
use super::queue::BoundedQueue;
use super::transport::{RemoteInputTransport, TransportEvent};
use crate::config::{InputdConfig, OrchestratorConfig, OrchestratorConfigPatch};
use crate::error::{PipelineError, PipelineResult, TransportError};
use crate::event_model::{FocusInputEvent, InputEvent, KeyboardInputEvent, MouseInputEvent, TouchInputEvent};
use crate::event_router::{EventValidator, FocusArbiter};
use crate::input_devices::keyboard::KeyInterceptor;
use crate::input_devices::shortcut::ShortcutEvent;
use crate::input_devices::{
    KeyboardCaptureHandler, MouseCaptureHandler, RawInputSource, TouchCaptureHandler, lock,
};

/// 编排器对外广播的通知
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrchestratorEvent {
    Connected,
    Disconnected,
    Error { message: String },
    /// 事件仍算已投递
    HighLatency { event: InputEvent, latency: f64 },
    /// 发送失败的事件直接丢弃, 不重试
    SendError { event: InputEvent, error: String },
    ProcessingError { error: String },
    Shortcut(ShortcutEvent),
}

struct PipelineState {
    config: OrchestratorConfig,
    validator: EventValidator,
    queue: BoundedQueue<InputEvent>,
    metrics: InputMetrics,
    /// 出队循环正在运行
    processing: bool,
    last_dispatch: Option<Instant>,
    destroyed: bool,
}

struct OrchestratorInner {
    transport: Arc<dyn RemoteInputTransport>,
    state: Mutex<PipelineState>,
    notifications: broadcast::Sender<OrchestratorEvent>,
    /// 焦点会话存在但目标失焦时为阻塞
    focus_gate: Arc<dyn KeyInterceptor>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// 输入流水线的中枢
///
/// 捕获处理器和焦点仲裁产生的事件依次经过校验, 限流, 有界队列,
/// 再由唯一的出队循环按 `rate_limit_ms` 的间隔交给传输层.
/// 传输层的连接由外部创建, 这里只监听它的状态通知
pub struct InputOrchestrator {
    inner: Arc<OrchestratorInner>,
    mouse: MouseCaptureHandler,
    keyboard: KeyboardCaptureHandler,
    touch: TouchCaptureHandler,
    focus: FocusArbiter,
}

impl std::fmt::Debug for InputOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputOrchestrator")
            .field("metrics", &self.get_metrics())
            .finish_non_exhaustive()
    }
}

impl InputOrchestrator {
    /// 必须在 tokio 运行时内调用, 转发任务在这里启动
    ///
    /// `global` 是整个窗口, 焦点仲裁在上面监听越界的指针按下
    pub fn new(
        config: &InputdConfig,
        global: Arc<dyn RawInputSource>,
        transport: Arc<dyn RemoteInputTransport>,
    ) -> Self {
        let pipeline = &config.orchestrator;
        let (notifications, _) = broadcast::channel(256);
        let mouse = MouseCaptureHandler::new(config.mouse.clone());
        let keyboard = KeyboardCaptureHandler::new(config.keyboard.clone());
        let touch = TouchCaptureHandler::new(config.touch.clone());
        let focus = FocusArbiter::new(global, config.focus.clone());
        keyboard.set_interceptor(Some(focus.interceptor()));

        let inner = Arc::new(OrchestratorInner {
            transport,
            state: Mutex::new(PipelineState {
                config: pipeline.clone(),
                validator: EventValidator::new(pipeline.rate_limit_ms),
                queue: BoundedQueue::new(pipeline.max_queue_size),
                metrics: InputMetrics::default(),
                processing: false,
                last_dispatch: None,
                destroyed: false,
            }),
            notifications,
            focus_gate: focus.interceptor(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let sources = InputSources {
            focus: focus.subscribe(),
            keyboard: keyboard.subscribe(),
            mouse: mouse.subscribe(),
            touch: touch.subscribe(),
        };
        let tasks = vec![
            forward_input(&inner, sources),
            forward(&inner, keyboard.subscribe_shortcuts(), |inner, shortcut| {
                inner.notify(OrchestratorEvent::Shortcut(shortcut));
            }),
            forward(&inner, focus.subscribe_shortcuts(), |inner, shortcut| {
                inner.notify(OrchestratorEvent::Shortcut(shortcut));
            }),
            watch_transport(&inner),
        ];
        *lock(&inner.tasks) = tasks;

        Self {
            inner,
            mouse,
            keyboard,
            touch,
            focus,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.notifications.subscribe()
    }

    /// 关闭了对应开关时不挂载, 返回 `false`
    pub fn capture_mouse_events(&self, surface: Arc<dyn RawInputSource>) -> bool {
        if !self.enabled(|config| config.enable_mouse) {
            debug!(surface = %surface.surface_id(), "mouse capture disabled");
            return false;
        }
        self.mouse.attach(surface);
        true
    }

    pub fn capture_keyboard_events(&self, surface: Arc<dyn RawInputSource>) -> bool {
        if !self.enabled(|config| config.enable_keyboard) {
            debug!(surface = %surface.surface_id(), "keyboard capture disabled");
            return false;
        }
        self.keyboard.attach(surface);
        true
    }

    pub fn capture_touch_events(&self, surface: Arc<dyn RawInputSource>) -> bool {
        if !self.enabled(|config| config.enable_touch) {
            debug!(surface = %surface.surface_id(), "touch capture disabled");
            return false;
        }
        self.touch.attach(surface);
        true
    }

    pub fn request_focus(&self, surface: Arc<dyn RawInputSource>) {
        self.focus.request_focus(surface);
    }

    pub fn release_focus(&self) {
        self.focus.release_focus();
    }

    /// 连上之后, 连接前积压的事件按原顺序出队
    pub async fn connect(&self, address: &str) -> Result<(), TransportError> {
        self.inner.transport.connect(address).await?;
        self.inner.kick();
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.inner.transport.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// 把外部产生的事件直接送进流水线
    pub fn ingest(&self, event: InputEvent) -> PipelineResult<()> {
        self.inner.accept(event)
    }

    pub fn update_config(&self, patch: OrchestratorConfigPatch) {
        let config = {
            let Ok(mut state) = self.inner.state() else {
                return;
            };
            state.config.apply(&patch);
            let rate_limit_ms = state.config.rate_limit_ms;
            let max_queue_size = state.config.max_queue_size;
            state.validator.update_config(rate_limit_ms);
            let evicted = state.queue.set_capacity(max_queue_size);
            if evicted > 0 {
                state.metrics.events_dropped += evicted as u64;
                warn!(evicted, max_queue_size, "queue shrunk");
            }
            state.config.clone()
        };
        info!(?config, "orchestrator config updated");

        if !config.enable_mouse {
            self.mouse.detach();
        }
        if !config.enable_keyboard {
            self.keyboard.detach();
        }
        if !config.enable_touch {
            self.touch.detach();
        }
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.inner
            .state()
            .map(|state| state.config.clone())
            .unwrap_or_default()
    }

    pub fn get_metrics(&self) -> InputMetrics {
        let mut metrics = match self.inner.state() {
            Ok(state) => {
                let mut metrics = state.metrics.clone();
                metrics.queue_size = state.queue.len();
                metrics.is_processing = state.processing;
                metrics
            }
            Err(_) => InputMetrics::default(),
        };
        metrics.is_connected = self.is_connected();
        metrics
    }

    /// 同时清空限流窗口
    pub fn reset_metrics(&self) {
        if let Ok(mut state) = self.inner.state() {
            state.metrics.reset();
            state.validator.reset();
        }
    }

    /// 停止出队循环和全部监听, 清空队列; 可以重复调用
    pub fn destroy(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
        self.mouse.detach();
        self.keyboard.detach();
        self.touch.detach();
        self.focus.teardown();

        if let Ok(mut state) = self.inner.state() {
            state.destroyed = true;
            state.processing = false;
            state.queue.clear();
            state.metrics.reset();
            state.validator.reset();
        }
        info!("orchestrator destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn mouse(&self) -> &MouseCaptureHandler {
        &self.mouse
    }

    pub fn keyboard(&self) -> &KeyboardCaptureHandler {
        &self.keyboard
    }

    pub fn touch(&self) -> &TouchCaptureHandler {
        &self.touch
    }

    pub fn focus(&self) -> &FocusArbiter {
        &self.focus
    }

    fn enabled(&self, pick: impl FnOnce(&OrchestratorConfig) -> bool) -> bool {
        self.inner.state().map(|state| pick(&state.config)).unwrap_or(false)
    }
}

impl Drop for InputOrchestrator {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl OrchestratorInner {
    /// 锁中毒时这一次算处理失败, 清掉标记后后续事件照常处理
    fn state(&self) -> PipelineResult<MutexGuard<'_, PipelineState>> {
        match self.state.lock() {
            Ok(state) => Ok(state),
            Err(poisoned) => {
                let err = PipelineError::from(poisoned);
                self.state.clear_poison();
                Err(err)
            }
        }
    }

    fn notify(&self, event: OrchestratorEvent) {
        let _ = self.notifications.send(event);
    }

    /// 校验失败或者限流的事件不入队, 只计数
    fn accept(self: &Arc<Self>, event: InputEvent) -> PipelineResult<()> {
        match self.enqueue(event) {
            Ok(()) => {
                self.kick();
                Ok(())
            }
            Err(PipelineError::Processing(error)) => {
                warn!(%error, "failed to ingest event");
                self.notify(OrchestratorEvent::ProcessingError { error: error.clone() });
                Err(PipelineError::Processing(error))
            }
            Err(err) => Err(err),
        }
    }

    fn enqueue(&self, mut event: InputEvent) -> PipelineResult<()> {
        let mut state = self.state()?;
        if state.destroyed {
            return Err(PipelineError::Destroyed);
        }
        let logging = state.config.enable_logging;

        if let Err(err) = state.validator.validate(&mut event) {
            state.metrics.validation_errors += 1;
            if logging {
                debug!(kind = %event.kind(), %err, "event rejected");
            }
            return Err(err.into());
        }
        let kind = event.kind();
        if !state.validator.check_rate_limit(kind) {
            state.metrics.rate_limit_hits += 1;
            if logging {
                debug!(%kind, "event rate limited");
            }
            return Err(PipelineError::RateLimited { kind });
        }

        let evicted = state.queue.push(event);
        if evicted > 0 {
            state.metrics.events_dropped += evicted as u64;
            debug!(error = %PipelineError::QueueOverflow { evicted }, "queue full");
        }
        if logging {
            debug!(%kind, queued = state.queue.len(), "event queued");
        }
        Ok(())
    }

    /// 连着且队列非空时启动出队循环; 已经在跑就只入队
    fn kick(self: &Arc<Self>) {
        if self.cancel.is_cancelled() || !self.transport.is_connected() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        {
            let Ok(mut state) = self.state() else {
                return;
            };
            if state.processing || state.queue.is_empty() {
                return;
            }
            state.processing = true;
        }

        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(inner) = weak.upgrade() {
                        if let Ok(mut state) = inner.state() {
                            state.processing = false;
                        }
                    }
                }
                _ = drain(weak.clone()) => {}
            }
        });
    }

    /// 取下一个待发事件, 队列空了或断开时返回 `None`
    ///
    /// 返回 `None` 时在同一把锁下清掉 `processing`, 否则 `kick` 可能
    /// 在循环退出前看到旧标记而漏掉刚入队的事件
    fn next_dispatch(&self) -> Option<(InputEvent, Duration, bool)> {
        // 中毒只让第一次取锁失败
        let mut state = self.state().or_else(|_| self.state()).ok()?;
        let next = if state.destroyed || !self.transport.is_connected() {
            None
        } else {
            state.queue.pop()
        };
        let Some(event) = next else {
            state.processing = false;
            return None;
        };
        state.last_dispatch = Some(Instant::now());
        let threshold = Duration::from_millis(state.config.latency_threshold_ms);
        Some((event, threshold, state.config.enable_logging))
    }

    fn spacing(&self) -> Option<Instant> {
        let state = self.state().ok()?;
        let last = state.last_dispatch?;
        Some(last + Duration::from_millis(state.config.rate_limit_ms))
    }

    fn record(
        &self,
        event: InputEvent,
        result: Result<(), TransportError>,
        latency: Duration,
        threshold: Duration,
        logging: bool,
    ) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        match result {
            Ok(()) => {
                if let Ok(mut state) = self.state() {
                    state.metrics.record_latency(latency_ms);
                }
                if logging {
                    debug!(kind = %event.kind(), latency_ms, "event dispatched");
                }
                if latency > threshold {
                    warn!(kind = %event.kind(), latency_ms, "high dispatch latency");
                    self.notify(OrchestratorEvent::HighLatency {
                        event,
                        latency: latency_ms,
                    });
                }
            }
            Err(err) => {
                let err = PipelineError::TransportSend(err);
                warn!(kind = %event.kind(), %err, "failed to send event");
                self.notify(OrchestratorEvent::SendError {
                    event,
                    error: err.to_string(),
                });
            }
        }
    }

    fn on_transport(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("transport connected");
                self.notify(OrchestratorEvent::Connected);
                self.kick();
            }
            TransportEvent::Disconnected => {
                info!("transport disconnected");
                self.notify(OrchestratorEvent::Disconnected);
            }
            TransportEvent::Error(message) => {
                warn!(%message, "transport error");
                self.notify(OrchestratorEvent::Error { message });
            }
        }
    }
}

/// 出队循环: 一次一个, 相邻两次投递至少间隔 `rate_limit_ms`
async fn drain(weak: Weak<OrchestratorInner>) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if let Some(not_before) = inner.spacing() {
            tokio::time::sleep_until(not_before).await;
        }
        let Some((event, threshold, logging)) = inner.next_dispatch() else {
            return;
        };
        let started = Instant::now();
        let result = inner.transport.send(&event).await;
        inner.record(event, result, started.elapsed(), threshold, logging);
    }
}

/// 捕获处理器和焦点仲裁的输出
struct InputSources {
    focus: mpsc::UnboundedReceiver<FocusInputEvent>,
    keyboard: mpsc::UnboundedReceiver<KeyboardInputEvent>,
    mouse: mpsc::UnboundedReceiver<MouseInputEvent>,
    touch: mpsc::UnboundedReceiver<TouchInputEvent>,
}

/// 所有输入走同一个转发任务; 同时就绪时焦点事件先入队,
/// 所以一次指针按下产生的 `focus` 总在 `mouse.down` 前面
fn forward_input(inner: &Arc<OrchestratorInner>, mut sources: InputSources) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let cancel = inner.cancel.clone();
    tokio::spawn(async move {
        loop {
            let event: InputEvent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = sources.focus.recv() => event.into(),
                Some(event) = sources.keyboard.recv() => event.into(),
                Some(event) = sources.mouse.recv() => event.into(),
                Some(event) = sources.touch.recv() => event.into(),
                else => break,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            // 键盘在拦截器里已经挡过
            let gated = matches!(event, InputEvent::Mouse(_) | InputEvent::Touch(_));
            if gated && inner.focus_gate.is_blocking() {
                trace!(kind = %event.kind(), "input dropped, surface not focused");
                continue;
            }
            // 被拒绝的事件已经计入指标
            let _ = inner.accept(event);
        }
    })
}

fn forward<T, F>(
    inner: &Arc<OrchestratorInner>,
    mut rx: mpsc::UnboundedReceiver<T>,
    handle: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(&Arc<OrchestratorInner>, T) + Send + 'static,
{
    let weak = Arc::downgrade(inner);
    let cancel = inner.cancel.clone();
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = rx.recv() => item,
            };
            let (Some(item), Some(inner)) = (item, weak.upgrade()) else {
                break;
            };
            handle(&inner, item);
        }
    })
}

fn watch_transport(inner: &Arc<OrchestratorInner>) -> JoinHandle<()> {
    let mut rx = inner.transport.subscribe_events();
    let weak = Arc::downgrade(inner);
    let cancel = inner.cancel.clone();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            let event = match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transport notifications lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.on_transport(event);
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::event_model::raw::{RawInput, RawPointerEvent, RawPointerKind};
    use crate::event_model::{MouseEventKind, MouseInputEvent, NO_BUTTON, Point, Rect};
    use crate::event_dispatcher::transport::MemoryTransport;
    use crate::input_devices::VirtualSurface;

    struct Fixture {
        window: Arc<VirtualSurface>,
        canvas: Arc<VirtualSurface>,
        transport: Arc<MemoryTransport>,
        orchestrator: InputOrchestrator,
    }

    fn fixture(configure: impl FnOnce(&mut InputdConfig)) -> Fixture {
        let mut config = InputdConfig::default();
        configure(&mut config);
        let window = VirtualSurface::new(Rect::new(0.0, 0.0, 1280.0, 800.0));
        let canvas = VirtualSurface::child_of(&window, Rect::new(0.0, 0.0, 800.0, 600.0));
        let transport = Arc::new(MemoryTransport::new());
        let orchestrator = InputOrchestrator::new(&config, window.clone(), transport.clone());
        Fixture {
            window,
            canvas,
            transport,
            orchestrator,
        }
    }

    fn mouse_at(kind: MouseEventKind, x: f64) -> InputEvent {
        let event = MouseInputEvent::new(kind, Point::new(x, 10.0), NO_BUTTON, 0, 1.0);
        match kind {
            MouseEventKind::Scroll => event.with_delta(0.0, 3.0).into(),
            _ => event.into(),
        }
    }

    fn xs(events: &[InputEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|event| match event {
                InputEvent::Mouse(mouse) => Some(mouse.x),
                _ => None,
            })
            .collect()
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_keeps_most_recent_events() {
        let f = fixture(|config| {
            config.orchestrator.rate_limit_ms = 0;
            config.orchestrator.max_queue_size = 5;
        });
        for i in 0..8 {
            f.orchestrator.ingest(mouse_at(MouseEventKind::Move, i as f64)).unwrap();
        }
        let metrics = f.orchestrator.get_metrics();
        assert_eq!(metrics.events_dropped, 3);
        assert_eq!(metrics.queue_size, 5);

        f.orchestrator.connect("memory").await.unwrap();
        settle(100).await;
        assert_eq!(xs(&f.transport.sent()), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(f.orchestrator.get_metrics().events_processed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_are_fifo_and_spaced() {
        let f = fixture(|_| {});
        f.orchestrator.connect("memory").await.unwrap();
        for (i, kind) in [MouseEventKind::Down, MouseEventKind::Move, MouseEventKind::Up].into_iter().enumerate() {
            f.orchestrator.ingest(mouse_at(kind, i as f64)).unwrap();
        }
        settle(200).await;

        assert_eq!(xs(&f.transport.sent()), vec![0.0, 1.0, 2.0]);
        let at = f.transport.sent_at();
        assert!(at.windows(2).all(|pair| pair[1] - pair[0] >= Duration::from_millis(16)));
        assert!(!f.orchestrator.get_metrics().is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_events_are_counted_not_queued() {
        let f = fixture(|_| {});
        f.orchestrator.ingest(mouse_at(MouseEventKind::Move, 1.0)).unwrap();
        assert!(matches!(
            f.orchestrator.ingest(mouse_at(MouseEventKind::Move, 2.0)),
            Err(PipelineError::RateLimited { .. })
        ));
        assert!(matches!(
            f.orchestrator.ingest(mouse_at(MouseEventKind::Down, f64::NAN)),
            Err(PipelineError::Validation(_))
        ));

        let metrics = f.orchestrator.get_metrics();
        assert_eq!(metrics.rate_limit_hits, 1);
        assert_eq!(metrics.validation_errors, 1);
        assert_eq!(metrics.queue_size, 1);

        f.orchestrator.reset_metrics();
        let metrics = f.orchestrator.get_metrics();
        assert_eq!(metrics.rate_limit_hits, 0);
        assert_eq!(metrics.queue_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_are_reported_without_retry() {
        let f = fixture(|_| {});
        let mut notifications = f.orchestrator.subscribe();
        f.transport.fail_next(1);
        f.orchestrator.connect("memory").await.unwrap();
        f.orchestrator.ingest(mouse_at(MouseEventKind::Down, 1.0)).unwrap();
        settle(100).await;

        assert_eq!(notifications.recv().await.unwrap(), OrchestratorEvent::Connected);
        match notifications.recv().await.unwrap() {
            OrchestratorEvent::SendError { event, error } => {
                assert_eq!(event.kind().to_string(), "mouse.Down");
                assert!(error.contains("injected failure"));
            }
            other => panic!("unexpected notification {other:?}"),
        }
        assert!(f.transport.sent().is_empty());
        assert_eq!(f.orchestrator.get_metrics().events_processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dispatch_raises_high_latency() {
        let f = fixture(|config| config.orchestrator.latency_threshold_ms = 100);
        let mut notifications = f.orchestrator.subscribe();
        f.transport.set_latency(Duration::from_millis(250));
        f.orchestrator.connect("memory").await.unwrap();
        f.orchestrator.ingest(mouse_at(MouseEventKind::Down, 1.0)).unwrap();
        settle(1000).await;

        assert_eq!(notifications.recv().await.unwrap(), OrchestratorEvent::Connected);
        match notifications.recv().await.unwrap() {
            OrchestratorEvent::HighLatency { latency, .. } => assert!(latency >= 250.0),
            other => panic!("unexpected notification {other:?}"),
        }
        let metrics = f.orchestrator.get_metrics();
        assert_eq!(metrics.events_processed, 1);
        assert!(metrics.max_latency >= 250.0);
        assert!((metrics.average_latency - metrics.max_latency * 0.1).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_sent_while_disconnected() {
        let f = fixture(|_| {});
        let mut notifications = f.orchestrator.subscribe();
        f.orchestrator.connect("memory").await.unwrap();
        f.transport.drop_connection();
        settle(10).await;
        f.orchestrator.ingest(mouse_at(MouseEventKind::Down, 1.0)).unwrap();
        settle(100).await;

        assert!(f.transport.sent().is_empty());
        assert_eq!(f.orchestrator.get_metrics().queue_size, 1);
        assert_eq!(notifications.recv().await.unwrap(), OrchestratorEvent::Connected);
        assert_eq!(notifications.recv().await.unwrap(), OrchestratorEvent::Disconnected);

        f.orchestrator.connect("memory").await.unwrap();
        settle(100).await;
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent() {
        let f = fixture(|config| config.orchestrator.rate_limit_ms = 0);
        for i in 0..3 {
            f.orchestrator.ingest(mouse_at(MouseEventKind::Move, i as f64)).unwrap();
        }
        f.orchestrator.destroy();
        f.orchestrator.destroy();

        let metrics = f.orchestrator.get_metrics();
        assert_eq!(metrics.queue_size, 0);
        assert_eq!(metrics.events_dropped, 0);
        assert!(f.orchestrator.is_destroyed());
        assert!(matches!(
            f.orchestrator.ingest(mouse_at(MouseEventKind::Move, 9.0)),
            Err(PipelineError::Destroyed)
        ));

        f.orchestrator.connect("memory").await.unwrap();
        settle(100).await;
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_queue_counts_evictions() {
        let f = fixture(|config| config.orchestrator.rate_limit_ms = 0);
        for i in 0..6 {
            f.orchestrator.ingest(mouse_at(MouseEventKind::Move, i as f64)).unwrap();
        }
        f.orchestrator.update_config(OrchestratorConfigPatch {
            max_queue_size: Some(2),
            ..Default::default()
        });
        let metrics = f.orchestrator.get_metrics();
        assert_eq!(metrics.queue_size, 2);
        assert_eq!(metrics.events_dropped, 4);
        assert_eq!(f.orchestrator.config().max_queue_size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_handlers_are_not_attached() {
        let f = fixture(|config| config.orchestrator.enable_touch = false);
        assert!(!f.orchestrator.capture_touch_events(f.canvas.clone()));
        assert!(f.orchestrator.capture_mouse_events(f.canvas.clone()));
        assert!(f.orchestrator.mouse().is_attached());

        f.orchestrator.update_config(OrchestratorConfigPatch {
            enable_mouse: Some(false),
            ..Default::default()
        });
        assert!(!f.orchestrator.mouse().is_attached());
        assert!(!f.orchestrator.capture_mouse_events(f.canvas.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn captured_pointer_input_reaches_transport() {
        let f = fixture(|_| {});
        f.orchestrator.request_focus(f.canvas.clone());
        f.orchestrator.capture_mouse_events(f.canvas.clone());
        f.orchestrator.connect("memory").await.unwrap();
        settle(20).await;

        f.canvas.emit(RawInput::Pointer(RawPointerEvent::new(RawPointerKind::Down, 40.0, 50.0).with_button(0)));
        settle(50).await;
        f.canvas.emit(RawInput::Pointer(RawPointerEvent::new(RawPointerKind::Up, 40.0, 50.0).with_button(0)));
        settle(200).await;

        let kinds: Vec<String> = f.transport.sent().iter().map(|e| e.kind().to_string()).collect();
        assert_eq!(kinds, vec!["focus.Focus", "mouse.Down", "mouse.Up"]);
        assert!(f.transport.sent().iter().all(InputEvent::is_validated));
        assert_eq!(f.window.listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_moves_between_surfaces_without_blur() {
        let f = fixture(|_| {});
        let other = VirtualSurface::child_of(&f.window, Rect::new(900.0, 0.0, 300.0, 300.0));
        f.orchestrator.request_focus(f.canvas.clone());
        f.orchestrator.request_focus(other.clone());

        assert!(!f.canvas.is_focused());
        assert!(other.is_focused());
        assert_eq!(f.orchestrator.focus().focused_surface(), Some(other.surface_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_is_raised_as_error() {
        let f = fixture(|_| {});
        let mut notifications = f.orchestrator.subscribe();
        f.transport.refuse_connections(true);
        assert!(f.orchestrator.connect("memory").await.is_err());
        settle(10).await;

        match notifications.recv().await.unwrap() {
            OrchestratorEvent::Error { message } => assert!(message.contains("refused"), "{message}"),
            other => panic!("unexpected notification {other:?}"),
        }
        assert!(!f.orchestrator.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn poisoned_state_fails_one_event_then_recovers() {
        let f = fixture(|config| config.orchestrator.rate_limit_ms = 0);
        let mut notifications = f.orchestrator.subscribe();
        let inner = f.orchestrator.inner.clone();
        let _ = std::thread::spawn(move || {
            let _state = inner.state.lock();
            panic!("panicked while holding pipeline state");
        })
        .join();

        assert!(matches!(
            f.orchestrator.ingest(mouse_at(MouseEventKind::Move, 1.0)),
            Err(PipelineError::Processing(_))
        ));
        assert!(matches!(
            notifications.try_recv(),
            Ok(OrchestratorEvent::ProcessingError { .. })
        ));

        f.orchestrator.ingest(mouse_at(MouseEventKind::Move, 2.0)).unwrap();
        assert_eq!(f.orchestrator.get_metrics().queue_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_dequeue_clears_processing_under_the_same_lock() {
        let f = fixture(|_| {});
        f.orchestrator.connect("memory").await.unwrap();
        f.orchestrator.inner.state().unwrap().processing = true;

        assert!(f.orchestrator.inner.next_dispatch().is_none());
        assert!(!f.orchestrator.get_metrics().is_processing);

        f.orchestrator.ingest(mouse_at(MouseEventKind::Down, 1.0)).unwrap();
        settle(50).await;
        assert_eq!(xs(&f.transport.sent()), vec![1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_wraps_transport_error() {
        let f = fixture(|_| {});
        let mut notifications = f.orchestrator.subscribe();
        f.transport.fail_next(1);
        f.orchestrator.connect("memory").await.unwrap();
        f.orchestrator.ingest(mouse_at(MouseEventKind::Down, 1.0)).unwrap();
        settle(50).await;

        let errors: Vec<String> = std::iter::from_fn(|| notifications.try_recv().ok())
            .filter_map(|event| match event {
                OrchestratorEvent::SendError { error, .. } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("send failed"), "{}", errors[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn focusing_click_is_ordered_after_focus() {
        let f = fixture(|_| {});
        f.orchestrator.capture_mouse_events(f.canvas.clone());
        f.orchestrator.focus().init(f.canvas.clone());
        f.orchestrator.connect("memory").await.unwrap();

        f.canvas.emit(RawInput::Pointer(RawPointerEvent::new(RawPointerKind::Down, 40.0, 50.0).with_button(0)));
        settle(100).await;

        let kinds: Vec<String> = f.transport.sent().iter().map(|e| e.kind().to_string()).collect();
        assert_eq!(kinds, vec!["focus.Focus", "mouse.Down"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pointer_input_is_dropped_while_unfocused() {
        let f = fixture(|_| {});
        f.orchestrator.capture_mouse_events(f.canvas.clone());
        f.orchestrator.request_focus(f.canvas.clone());
        f.orchestrator.connect("memory").await.unwrap();
        f.window.emit(RawInput::Pointer(RawPointerEvent::new(RawPointerKind::Click, 1000.0, 700.0)));
        settle(20).await;
        assert!(!f.orchestrator.focus().is_focused());

        f.canvas.emit(RawInput::Pointer(RawPointerEvent::new(RawPointerKind::Move, 40.0, 50.0)));
        settle(100).await;

        let kinds: Vec<String> = f.transport.sent().iter().map(|e| e.kind().to_string()).collect();
        assert_eq!(kinds, vec!["focus.Focus", "focus.Blur"]);
    }
}
