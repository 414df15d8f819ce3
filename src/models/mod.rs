// 数据模型模块

pub mod tunnel;

pub use tunnel::{ForwardNode, KeyfileNode, TunnelNode};
