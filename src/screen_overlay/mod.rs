/// # 焦点框
///
/// 焦点会话期间在被捕获的表面外画一圈边框, 绘制交给 [`focus_indicator::OverlayBackend`]
///
/// 默认后端 [`focus_indicator::TracingBackend`] 只写日志, 真正的叠加层由宿主程序提供
pub mod focus_indicator;

/// 可聚焦元素信息
pub mod surface_info;

/// Tab 导航状态
pub mod surface_state;
