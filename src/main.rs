#[macro_use]
// 启用tracing宏
extern crate tracing;

use std::{env, io};

use clap::Parser;
use toplevel_txn::cli::{Cli, Sub};
use toplevel_txn::replay::{self, Scenario};
use tracing_subscriber::EnvFilter;

// 默认日志过滤规则
const DEFAULT_LOG_FILTER: &str = "toplevel_txn=debug";

fn main() -> anyhow::Result<()> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    // 日志输出到 stderr，stdout 留给报告
    tracing_subscriber::fmt()
        .compact()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    tracy_client::Client::start();

    match cli.subcommand {
        Sub::Replay { path, json } => {
            info!("replaying {path:?}");

            let scenario = Scenario::load(&path)?;
            let report = replay::run(&scenario)?;

            if json {
                let out = serde_json::to_string_pretty(&report)?;
                println!("{out}");
            } else {
                print!("{}", replay::format_report(&report));
            }
        }
    }

    Ok(())
}
