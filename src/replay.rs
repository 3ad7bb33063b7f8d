use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::InputdConfig;
use crate::event_dispatcher::metrics::InputMetrics;
use crate::event_dispatcher::orchestrator::{InputOrchestrator, OrchestratorEvent};
use crate::event_dispatcher::transport::RemoteInputTransport;
use crate::event_model::Rect;
use crate::event_model::raw::{RawInput, now_ms};
use crate::input_devices::VirtualSurface;
use crate::screen_overlay::surface_info::FocusableInfo;

/// 最后一步之后最多等这么久让队列排空
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 回放用的两层表面: 整个窗口和里面被捕获的画布
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceLayout {
    pub window: Rect,
    pub canvas: Rect,
    /// 开始前是否直接获取焦点; 否则只开启焦点会话, 等指针按下
    pub focus: bool,
    pub focusables: Vec<FocusableInfo>,
}

impl Default for SurfaceLayout {
    fn default() -> Self {
        Self {
            window: Rect::new(0.0, 0.0, 1280.0, 800.0),
            canvas: Rect::new(0.0, 0.0, 1024.0, 768.0),
            focus: true,
            focusables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Window,
    #[default]
    Canvas,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayStep {
    /// 距上一步的等待时间
    #[serde(default)]
    pub after_ms: u64,
    #[serde(default)]
    pub target: Target,
    /// 时间戳为 0 时用回放时刻补上
    pub input: RawInput,
}

/// ```toml
/// [surfaces]
/// canvas = { x = 0, y = 0, width = 800, height = 600 }
///
/// [[step]]
/// after_ms = 20
/// input = { source = "pointer", kind = "down", clientX = 10, clientY = 10 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayScript {
    pub surfaces: SurfaceLayout,
    #[serde(rename = "step")]
    pub steps: Vec<ReplayStep>,
}

impl ReplayScript {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid replay script {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// 一次回放的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub steps: usize,
    pub metrics: InputMetrics,
    pub notifications: Vec<OrchestratorEvent>,
}

/// 把脚本里的原始通知逐条注入虚拟表面, 走完整条流水线
pub async fn run(
    config: &InputdConfig,
    script: &ReplayScript,
    transport: Arc<dyn RemoteInputTransport>,
    address: &str,
) -> anyhow::Result<ReplayReport> {
    let layout = &script.surfaces;
    let window = VirtualSurface::new(layout.window);
    let canvas = VirtualSurface::child_of(&window, layout.canvas);
    for element in &layout.focusables {
        canvas.add_focusable(element.clone());
    }

    let orchestrator = InputOrchestrator::new(config, window.clone(), transport);
    let mut notifications = orchestrator.subscribe();
    orchestrator.capture_mouse_events(canvas.clone());
    orchestrator.capture_keyboard_events(canvas.clone());
    orchestrator.capture_touch_events(canvas.clone());
    if layout.focus {
        orchestrator.request_focus(canvas.clone());
    } else {
        orchestrator.focus().init(canvas.clone());
    }

    orchestrator
        .connect(address)
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    info!(address, steps = script.steps.len(), "replay started");

    for (index, step) in script.steps.iter().enumerate() {
        if step.after_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
        }
        let mut input = step.input.clone();
        if let Some(timestamp) = input.timestamp_mut() {
            if *timestamp == 0.0 {
                *timestamp = now_ms();
            }
        }
        debug!(index, target = ?step.target, ?input, "replay step");
        match step.target {
            Target::Window => window.emit(input),
            Target::Canvas => canvas.emit(input),
        }
    }

    // 等合并移动和单击判定的定时器触发
    let timers = config
        .mouse
        .throttle_ms
        .max(config.touch.double_tap_threshold_ms)
        .max(config.mouse.click_threshold_ms);
    tokio::time::sleep(Duration::from_millis(timers + 1)).await;
    if tokio::time::timeout(DRAIN_TIMEOUT, drained(&orchestrator)).await.is_err() {
        warn!(queued = orchestrator.get_metrics().queue_size, "queue did not drain before timeout");
    }

    let metrics = orchestrator.get_metrics();
    orchestrator.destroy();
    let report = ReplayReport {
        steps: script.steps.len(),
        metrics,
        notifications: collect(&mut notifications),
    };
    info!(
        processed = report.metrics.events_processed,
        dropped = report.metrics.events_dropped,
        "replay finished"
    );
    Ok(report)
}

async fn drained(orchestrator: &InputOrchestrator) {
    loop {
        let metrics = orchestrator.get_metrics();
        if metrics.queue_size == 0 && !metrics.is_processing {
            return;
        }
        tokio::time::sleep(Duration::from_millis(orchestrator.config().rate_limit_ms.max(1))).await;
    }
}

fn collect(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "replay notifications lagged");
            }
            Err(_) => return out,
        }
    }
}
