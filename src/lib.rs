pub mod cli;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod executor;
pub mod io_utils;
pub mod job;
pub mod keys;
pub mod mapping;
pub mod resolver;
pub mod service;
pub mod source;
pub mod storage;
pub mod store;
pub mod table;
pub mod transform;
pub mod validate;

use std::{env, fs, path::Path, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::ImportConfig,
    entities::EntityCatalog,
    job::JobQuery,
    mapping::ColumnMapping,
    service::ImportService,
    store::MemoryStore,
};

pub const STORE_SNAPSHOT: &str = "entities.json";
pub const WORKSPACE_CONFIG: &str = "config.yaml";

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("crm_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let catalog = match &cli.catalog {
        Some(path) => EntityCatalog::load(path)?,
        None => EntityCatalog::builtin()?,
    };
    let snapshot = cli.workspace.join(STORE_SNAPSHOT);
    let store = Arc::new(MemoryStore::load(&snapshot)?);
    let service = ImportService::open(&cli.workspace, Arc::new(catalog), store.clone(), config)
        .with_context(|| format!("Opening workspace {:?}", cli.workspace))?;
    debug!("Workspace {:?} ready", cli.workspace);

    match &cli.command {
        Commands::Template(args) => handle_template(&service, args),
        Commands::Upload(args) => {
            let job = service.upload(&args.file, args.entity, args.actor)?;
            println!("{}", job.id);
            Ok(())
        }
        Commands::Preview(args) => {
            let preview = service.preview(args.job)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print!("{}", table::preview_table(&preview));
            }
            Ok(())
        }
        Commands::SetEntity(args) => {
            service.update_entity_type(args.job, args.entity)?;
            Ok(())
        }
        Commands::Map(args) => handle_map(&service, args),
        Commands::Validate(args) => {
            let report = service.validate(args.job)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", table::report_summary(&report));
            }
            Ok(())
        }
        Commands::Process(args) => {
            let outcome = service.process(args.job);
            store
                .save(&snapshot)
                .with_context(|| format!("Saving entity store to {snapshot:?}"))?;
            let job = outcome?;
            println!(
                "{}: {} row(s), {} imported, {} failed",
                job.status, job.processed_rows, job.success_count, job.error_count
            );
            Ok(())
        }
        Commands::Jobs(args) => {
            let jobs = service.get_all(&JobQuery {
                entity_type: args.entity,
                status: args.status,
                created_by: args.actor,
            })?;
            print!("{}", table::jobs_table(&jobs));
            Ok(())
        }
        Commands::Show(args) => handle_show(&service, args),
    }
}

fn load_config(cli: &Cli) -> Result<ImportConfig> {
    let workspace_config = cli.workspace.join(WORKSPACE_CONFIG);
    let path = match &cli.config {
        Some(path) => Some(path.as_path()),
        None if workspace_config.is_file() => Some(workspace_config.as_path()),
        None => None,
    };
    match path {
        Some(path) => {
            ImportConfig::load(path).with_context(|| format!("Loading settings from {path:?}"))
        }
        None => Ok(ImportConfig::default()),
    }
}

fn handle_template(service: &ImportService, args: &cli::TemplateArgs) -> Result<()> {
    let csv = service.template(args.entity)?;
    match &args.output {
        Some(path) => {
            fs::write(path, csv).with_context(|| format!("Writing template to {path:?}"))?;
            info!("{} template written to {:?}", args.entity, path);
        }
        None => print!("{csv}"),
    }
    Ok(())
}

fn handle_map(service: &ImportService, args: &cli::MapArgs) -> Result<()> {
    let mapping: ColumnMapping = match &args.file {
        Some(path) => read_mapping(path)?,
        None => service.suggest_mapping(args.job)?,
    };
    if let Some(path) = &args.write {
        config::save_yaml(path, &mapping)?;
        info!("Mapping for job {} written to {:?}", args.job, path);
    }
    service.map_columns(args.job, mapping)?;
    Ok(())
}

fn read_mapping(path: &Path) -> Result<ColumnMapping> {
    config::load_yaml(path).with_context(|| format!("Loading column mapping from {path:?}"))
}

fn handle_show(service: &ImportService, args: &cli::ShowArgs) -> Result<()> {
    let job = service.get_by_id(args.job)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }
    print!("{}", table::jobs_table(std::slice::from_ref(&job)));
    if !job.errors.is_empty() {
        let headers = vec!["row".to_string(), "error".to_string(), "data".to_string()];
        let rows: Vec<Vec<String>> = job
            .errors
            .iter()
            .map(|error| {
                vec![
                    error.row.to_string(),
                    error.message.clone(),
                    error.data.to_string(),
                ]
            })
            .collect();
        println!();
        print!("{}", table::render_table(&headers, &rows));
    }
    if job.errors_truncated > 0 {
        println!("... {} more row error(s) not kept", job.errors_truncated);
    }
    Ok(())
}
