//! 推送通知扇出服务
//!
//! 把一条推送活动展开为每个 (用户, 设备 token) 的投递目标，
//! 以有界并发逐个发送，跟踪每个目标的结果并维护活动的聚合状态。
//! 支持定时发送、定时取消和进程重启后的恢复。

pub mod aggregator;
pub mod api;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod expander;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod test_utils;
pub mod transport;

pub use error::{NotificationError, Result};
pub use service::NotificationService;
