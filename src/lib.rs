// tunnelkeeper - SSH 隧道守护与 SCP 传输

pub mod constants;
pub mod models;
pub mod services;
pub mod ssh;
