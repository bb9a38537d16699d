/// cli.rs - 命令行接口定义
/// 使用 clap 的派生宏生成解析器

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    #[command(subcommand)]
    pub subcommand: Sub,
}

#[derive(Subcommand)]
pub enum Sub {
    /// 用无头客户端回放一个事务场景
    Replay {
        /// 场景文件（JSON）
        path: PathBuf,

        /// 以 JSON 格式输出最终状态
        #[arg(short, long)]
        json: bool,
    },
}
