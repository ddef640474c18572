use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use zlayer_config::{AppConfig, ConfigError};
use zlayer_core::document::{Document, DxfVersion};
use zlayer_core::geometry::Point2;
use zlayer_engine::command::{CommandBus, CommandContext, CommandRequest};
use zlayer_engine::session::Session;
use zlayer_io::{DocumentLoader, DocumentSaver, DxfFacade};

mod report;

const VIEWPORT_SIZE: f64 = 180.0;
const VIEWPORT_SPACING: f64 = 200.0;

/// DXF 图层按视口覆盖属性的命令行工具
#[derive(Parser, Debug)]
#[command(name = "zlayer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 配置文件路径，缺省时按 ZLAYER_CONFIG 或 ./config/default.toml 查找
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 打印图层、视口与视口覆盖概览
    Info {
        /// DXF 文件路径
        path: PathBuf,
    },

    /// 新建 DXF 文档
    New {
        /// 输出路径
        path: PathBuf,

        /// DXF 版本（如 R2018 或 AC1032），缺省取配置中的默认版本
        #[arg(long = "dxf-version")]
        version: Option<DxfVersion>,

        /// 额外创建的图层，可重复
        #[arg(long = "layer")]
        layers: Vec<String>,

        /// 创建的视口数量
        #[arg(long, default_value_t = 0)]
        viewports: usize,
    },

    /// 依次执行命令并保存文档
    Exec {
        /// DXF 文件路径
        path: PathBuf,

        /// 要执行的命令，例如 "vp_set WALLS color 3"，可重复
        #[arg(short = 'c', long = "command", required = true)]
        commands: Vec<String>,

        /// 输出路径，缺省时覆盖原文件
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 只执行不保存
        #[arg(long)]
        dry_run: bool,

        /// 即使原文件含有无法写回的内容也覆盖原文件
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = load_configuration(cli.config.clone());
    init_logging(&config);
    debug!(version = %config.document.default_version, "已加载配置");

    if let Err(err) = run(cli.command, &config) {
        error!(error = %err, "执行失败");
        eprintln!("错误: {err:#}");
        std::process::exit(1);
    }
}

fn run(command: Commands, config: &AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::Info { path } => {
            let document = load_document(&path)?;
            report::print_summary(&path, &document)?;
        }
        Commands::New {
            path,
            version,
            layers,
            viewports,
        } => {
            let version = version.unwrap_or(config.document.default_version);
            let document = build_document(version, &layers, viewports)?;
            save_document(&document, &path)?;
            info!(path = %path.display(), %version, "已创建文档");
            println!("已创建 {}（{version}）", path.display());
        }
        Commands::Exec {
            path,
            commands,
            output,
            dry_run,
            force,
        } => {
            let (document, skipped) = DxfFacade::new()
                .load_with_skipped(&path)
                .with_context(|| format!("无法读取 {}", path.display()))?;
            if output.is_none() && !dry_run && !force && !skipped.is_empty() {
                bail!(
                    "{} 含有写出时无法保留的内容（{skipped}），请用 -o 另存或加 --force 覆盖",
                    path.display()
                );
            }
            let mut session = Session::with_document(document);
            execute_commands(&mut session, &commands)?;

            if config.session.commit_on_save {
                let committed = session.commit_all()?;
                if committed > 0 {
                    info!(committed, "保存前提交了未提交的视口覆盖");
                }
            } else {
                let pending = session.dirty_overrides().len();
                if pending > 0 {
                    warn!(pending, "存在未提交的视口覆盖，保存时将被丢弃");
                }
            }

            if dry_run {
                info!("dry-run 模式，不写出文件");
                return Ok(());
            }
            let target = output.unwrap_or(path);
            save_document(session.document(), &target)?;
            println!("已保存 {}", target.display());
        }
    }
    Ok(())
}

fn build_document(
    version: DxfVersion,
    layers: &[String],
    viewports: usize,
) -> anyhow::Result<Document> {
    let mut document = Document::new(version);
    for name in layers {
        document
            .add_layer(name.as_str())
            .with_context(|| format!("无法创建图层 {name}"))?;
    }
    for index in 0..viewports {
        let x = VIEWPORT_SPACING * index as f64 + VIEWPORT_SPACING / 2.0;
        document
            .add_viewport(
                Point2::new(x, VIEWPORT_SPACING / 2.0),
                VIEWPORT_SIZE,
                VIEWPORT_SIZE,
            )
            .context("无法创建视口")?;
    }
    Ok(document)
}

fn execute_commands(session: &mut Session, commands: &[String]) -> anyhow::Result<()> {
    let bus = CommandBus::new();
    let mut context = CommandContext { session };
    for line in commands {
        let Some(request) = CommandRequest::parse(line) else {
            continue;
        };
        let response = bus.dispatch(&request, &mut context);
        let message = response.message.unwrap_or_default();
        if !response.success {
            bail!("命令 `{line}` 执行失败: {message}");
        }
        debug!(command = %request.name, "命令执行成功");
        if !message.is_empty() {
            println!("{message}");
        }
    }
    Ok(())
}

fn load_document(path: &Path) -> anyhow::Result<Document> {
    DxfFacade::new()
        .load(path)
        .with_context(|| format!("无法读取 {}", path.display()))
}

fn save_document(document: &Document, path: &Path) -> anyhow::Result<()> {
    DxfFacade::new()
        .save(document, path)
        .with_context(|| format!("无法写出 {}", path.display()))
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

/// 日志输出到 stderr，stdout 留给命令结果。
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn build_document_creates_layers_and_viewports() {
        let document = build_document(DxfVersion::R2010, &["A".into(), "B".into()], 3).unwrap();
        assert_eq!(document.layers().count(), 3);
        assert_eq!(document.viewports().count(), 3);
        assert!(build_document(DxfVersion::R2010, &["a|b".into()], 0).is_err());
    }

    #[test]
    fn failing_command_stops_execution() {
        let document = build_document(DxfVersion::R2018, &["WALLS".into()], 1).unwrap();
        let mut session = Session::with_document(document);
        let commands = vec![
            "vp_set WALLS color 2".to_string(),
            "vp_set WALLS color 999".to_string(),
            "vp_set WALLS lineweight 30".to_string(),
        ];
        assert!(execute_commands(&mut session, &commands).is_err());
        let viewport = session.active_viewport().unwrap();
        let store = session.overrides("WALLS", viewport).unwrap();
        assert_eq!(store.get_color(), 2);
        assert_eq!(store.get_lineweight(), -3);
    }
}
