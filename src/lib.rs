/// lib.rs - 顶层窗口事务核心的库根模块
///
/// 合成器在把窗口的新状态（位置、尺寸、贴靠、全屏、映射）显示出来之前，
/// 先通过 configure 告诉客户端，等客户端确认并按新尺寸重绘后再和同一事务里的
/// 其他窗口一起原子地切换。

/// 启用 tracing 宏的全局引入
#[macro_use]
extern crate tracing;

/// 无头客户端与场景节点，供测试和回放工具驱动
pub mod backend;

/// 命令行参数解析
pub mod cli;

/// 事务相关配置
pub mod config;

/// smithay xdg_toplevel 适配层
pub mod handlers;

/// 场景回放
pub mod replay;

/// 事务管理器
pub mod transaction;

/// 几何工具、ID 生成、通知信号
pub mod utils;

/// 顶层窗口事务对象
pub mod window;

#[cfg(test)]
mod tests;
