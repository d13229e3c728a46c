use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use citytiles_config::AppConfig;
use citytiles_core::geometry::LonLat;
use citytiles_core::model::IdSequence;
use citytiles_engine::converter::ProcessConverter;
use citytiles_engine::extraction::{ExtractOptions, extract, write_outputs};
use citytiles_engine::merge::{MergeOptions, MergePipeline, MissPolicy, ModelOutcome};
use citytiles_engine::publish::{DirectoryBlobStore, publish_assets};
use citytiles_engine::resolver::resolve;
use citytiles_engine::spatial_index::SpatialIndex;
use citytiles_engine::synthesizer::LookupGuard;
use citytiles_io::{KmlFacade, TileNaming};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "citytiles", about = "三维城市模型瓦片合并与提取工具")]
struct Cli {
    /// 配置文件路径；未指定时按环境变量与 ./config/default.toml 自动发现
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// 覆盖配置中的数据集根目录
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// 覆盖配置中的数据集名称
    #[arg(long, global = true)]
    name: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 将外部模型目录并入现有瓦片
    Merge {
        #[arg(long)]
        models: PathBuf,
        /// 跳过不在任何瓦片内的模型，而不是中止
        #[arg(long)]
        skip_misses: bool,
    },
    /// 生成 tiles.json 与 buildings.json
    Extract {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// 上传网格资产并写出索引文档
    Publish {
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// 查询包含给定点的瓦片
    Locate {
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
    },
}

fn main() {
    let cli = Cli::parse();
    let mut config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("错误: {err:#}");
            std::process::exit(1);
        }
    };
    if let Some(root) = &cli.root {
        config.dataset.root = root.clone();
    }
    if let Some(name) = &cli.name {
        config.dataset.name = name.clone();
    }

    init_logging(&config);
    info!(root = %config.dataset.root.display(), dataset = %config.dataset.name, "启动 citytiles");

    if let Err(err) = run(&config, cli.command) {
        error!(error = %err, "执行失败");
        eprintln!("错误: {err:#}");
        std::process::exit(1);
    }
}

/// 显式指定的配置加载失败视为致命错误；自动发现失败同样终止。
fn load_configuration(override_path: Option<&Path>) -> Result<AppConfig> {
    match override_path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("加载指定配置 {} 失败", path.display())),
        None => AppConfig::discover().context("加载默认配置失败"),
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

fn run(config: &AppConfig, command: Command) -> Result<()> {
    let root = config.dataset.root.as_path();
    let naming = TileNaming::new(config.dataset.name.clone());
    let facade = KmlFacade::new();

    match command {
        Command::Merge {
            models,
            skip_misses,
        } => {
            let index = SpatialIndex::build(root, &naming, &facade)?;
            let converter = ProcessConverter::new(&config.merge.converter)
                .with_args(config.merge.converter_args.iter().cloned());
            let mut options = merge_options(config);
            if skip_misses {
                options.miss_policy = MissPolicy::Skip;
            }
            let report = MergePipeline::new(root, &naming, &index, &facade, &facade, &converter)
                .with_options(options)
                .merge_all(&models)?;
            for outcome in &report.models {
                match outcome {
                    ModelOutcome::Merged {
                        model,
                        coord,
                        outcome,
                    } => println!(
                        "merged {model} -> Tile_{coord} (placemark: {}, folder: {}, lookup: {})",
                        outcome.placemark_added, outcome.folder_added, outcome.lookup_added
                    ),
                    ModelOutcome::SkippedMiss { model, point } => {
                        println!("skipped {model}: {point} lies outside every tile")
                    }
                }
            }
            println!(
                "{} merged, {} skipped",
                report.merged(),
                report.skipped()
            );
        }
        Command::Extract { out } => {
            let out = out.unwrap_or_else(|| config.publish.output.clone());
            let extraction = extract(
                root,
                &naming,
                &facade,
                &mut IdSequence::new(),
                extract_options(config),
            )?;
            let (tiles, buildings) = write_outputs(&extraction, &out)?;
            println!(
                "{} tiles, {} buildings -> {}, {}",
                extraction.index.tiles.len(),
                extraction.buildings.len(),
                tiles.display(),
                buildings.display()
            );
        }
        Command::Publish { out, store } => {
            let out = out.unwrap_or_else(|| config.publish.output.clone());
            let store = DirectoryBlobStore::new(store.unwrap_or_else(|| config.publish.store.clone()));
            let extraction = extract(
                root,
                &naming,
                &facade,
                &mut IdSequence::new(),
                extract_options(config),
            )?;
            let report = publish_assets(&extraction, &store, &out)?;
            println!(
                "{} uploaded, {} failed",
                report.uploaded.len(),
                report.failed.len()
            );
            for failure in &report.failed {
                println!("failed {}: {}", failure.key, failure.error);
            }
            if !report.failed.is_empty() {
                bail!("{} asset uploads failed", report.failed.len());
            }
        }
        Command::Locate { lon, lat } => {
            let index = SpatialIndex::build(root, &naming, &facade)?;
            let point = LonLat::new(lon, lat);
            match resolve(point, &index) {
                Some(coord) => println!("{}", naming.folder_name(coord)),
                None => bail!("point {point} lies outside every tile"),
            }
        }
    }
    Ok(())
}

fn merge_options(config: &AppConfig) -> MergeOptions {
    MergeOptions {
        miss_policy: match config.merge.miss_policy {
            citytiles_config::MissPolicy::Abort => MissPolicy::Abort,
            citytiles_config::MissPolicy::Skip => MissPolicy::Skip,
        },
        lookup_guard: match config.merge.lookup_guard {
            citytiles_config::LookupGuard::Entity => LookupGuard::Entity,
            citytiles_config::LookupGuard::Tile => LookupGuard::Tile,
        },
    }
}

fn extract_options(config: &AppConfig) -> ExtractOptions {
    ExtractOptions {
        heading_offset: config.extraction.heading_offset,
        height_offset: config.extraction.height_offset,
    }
}
