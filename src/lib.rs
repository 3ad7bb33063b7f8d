/// 输入事件对外分发: 编排器, 队列, 传输层
pub mod event_dispatcher;

/// 屏幕叠加层接口，用于显示焦点框
pub mod screen_overlay;

/// 原始输入接口与捕获处理器（鼠标，键盘，触摸）
pub mod input_devices;

/// 输入事件的内部路由逻辑: 焦点仲裁和校验
pub mod event_router;

/// 输入事件的抽象层，定义事件模型
pub mod event_model;

/// `inputd.toml` 配置
pub mod config;

/// 流水线错误分类
pub mod error;

/// 脚本回放
pub mod replay;

pub use config::InputdConfig;
pub use error::{PipelineError, PipelineResult, TransportError, ValidationError};
pub use event_dispatcher::{InputOrchestrator, OrchestratorEvent};

// `input_devices` 只认 `RawInputSource`，不关心背后是浏览器画布，原生窗口还是 `VirtualSurface`
// 捕获处理器各自独占自己在表面上的监听，重复 attach 会先 detach 旧的

// `event_router` 夹在捕获和分发之间：焦点仲裁决定捕获到的输入能不能往后走，校验器决定事件能不能进队列
// 键盘在拦截器里挡，鼠标和触摸在编排器的转发任务里挡；失焦时还按着的键会补一个 keyup
// 被焦点快捷键吃掉的按键不会到达编排器，但快捷键本身会作为通知广播出去

// `event_dispatcher` 的出队循环只有一个，靠 processing 标志互斥
// 丢事件比卡住好：鼠标移动丢了一个，下一个马上就来，所以队列满了丢最旧的，发送失败也不重试

// HACK: 限流窗口按 (类型, 种类) 计，同一窗口内的两个不同按键的 keydown 后一个会被丢掉
// 键盘多半需要单独的窗口，先和远端一起看看实际的丢键率
