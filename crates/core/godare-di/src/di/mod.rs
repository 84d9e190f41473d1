//! 依赖注入模块
//!
//! 提供注册、作用域管理、依赖解析、循环检测与性能指标。

pub mod di_builder;
pub mod di_container;
pub mod di_graph;
pub mod di_metrics;
pub mod di_registry;
pub mod di_resolver;
pub mod di_scope;
pub mod di_service_descriptor;

// 重新导出主要类型
pub use di_builder::*;
pub use di_container::*;
pub use di_graph::*;
pub use di_metrics::*;
pub use di_registry::*;
pub use di_resolver::*;
pub use di_scope::*;
pub use di_service_descriptor::*;
