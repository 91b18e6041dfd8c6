//! 调度模块
//!
//! 包含调度系统的核心组件：
//! - 头部规范化
//! - 调度器与执行信封
//! - 进程级事件总线
//! - 通知扇出

pub mod dispatcher;
pub mod event_bus;
pub mod fanout;
pub mod headers;

// 重导出常用类型
pub use dispatcher::{
    handler_fn, ActHandler, DispatchStats, DispatchStatsSnapshot, Dispatcher, HandlerChain,
    HandlerRef,
};
pub use event_bus::{matches_topic, Event, EventBus, EventBusConfig, EventCallback};
pub use fanout::{routing_key, LOCAL_WILDCARD_TOKEN, WILDCARD_TOKEN};
pub use headers::{Headers, LOCAL_EMITTER};
