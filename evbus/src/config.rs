//! 事件总线配置
//!
use bon::Builder;
use std::time::Duration;

/// 事件总线配置
///
/// ```
/// use evbus::EventBusConfig;
/// use std::time::Duration;
///
/// let config = EventBusConfig::builder()
///     .name("browser")
///     .handler_timeout(Duration::from_secs(30))
///     .build();
/// assert_eq!(config.max_history, 100);
/// ```
#[derive(Builder, Clone, Debug)]
pub struct EventBusConfig {
    /// 总线名称（用于日志字段）
    #[builder(into, default = String::from("EventBus"))]
    pub name: String,
    /// 单个处理器的执行时限；超时记为该处理器失败，不影响同一事件的其他处理器
    pub handler_timeout: Option<Duration>,
    /// 历史记录上限（仅保留最近派发的事件）
    #[builder(default = 100)]
    pub max_history: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
