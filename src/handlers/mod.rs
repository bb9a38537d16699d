// 文件: handlers/mod.rs
// 作用: 客户端协议事件到事务对象的适配层

pub mod xdg_shell;

pub use xdg_shell::{notify_toplevel_destroyed, CommitHook, ToplevelHost, XdgToplevelClient};
