use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::{entities::EntityType, job::JobStatus};

#[derive(Debug, Parser)]
#[command(author, version, about = "Import CSV files into CRM entities", long_about = None)]
pub struct Cli {
    /// Directory holding jobs, uploads, and the entity store snapshot
    #[arg(short = 'w', long, global = true, default_value = ".crm-import")]
    pub workspace: PathBuf,
    /// YAML file overriding the default import settings
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,
    /// YAML entity catalog replacing the built-in one
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print a CSV template (header plus an example row) for an entity type
    Template(TemplateArgs),
    /// Register a CSV file as a new pending import job
    Upload(UploadArgs),
    /// Show the headers and first rows of an uploaded file
    Preview(PreviewArgs),
    /// Change the entity type a pending job imports into
    SetEntity(SetEntityArgs),
    /// Attach a column mapping to a pending job
    Map(MapArgs),
    /// Dry-run a sample of rows through the mapping and report problems
    Validate(ValidateArgs),
    /// Import every row of a mapped job
    Process(JobArgs),
    /// List import jobs
    Jobs(JobsArgs),
    /// Show one import job, including its row errors
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct TemplateArgs {
    #[arg(value_parser = parse_entity)]
    pub entity: EntityType,
    /// Write the template here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// CSV file to import
    pub file: PathBuf,
    /// Target entity type (contacts, companies, leads, deals)
    #[arg(short, long, value_parser = parse_entity)]
    pub entity: EntityType,
    /// Identifier recorded as the creator of imported records
    #[arg(long, default_value_t = 1)]
    pub actor: i64,
}

#[derive(Debug, Args)]
pub struct JobArgs {
    #[arg(value_parser = parse_job)]
    pub job: Uuid,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[arg(value_parser = parse_job)]
    pub job: Uuid,
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SetEntityArgs {
    #[arg(value_parser = parse_job)]
    pub job: Uuid,
    #[arg(value_parser = parse_entity)]
    pub entity: EntityType,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[arg(value_parser = parse_job)]
    pub job: Uuid,
    /// YAML or JSON mapping: a list of entries or a flat `column: field` map
    #[arg(short, long, conflicts_with = "auto", required_unless_present = "auto")]
    pub file: Option<PathBuf>,
    /// Derive the mapping from the file's header names
    #[arg(long)]
    pub auto: bool,
    /// Also save the applied mapping as YAML for later editing
    #[arg(long)]
    pub write: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(value_parser = parse_job)]
    pub job: Uuid,
    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct JobsArgs {
    #[arg(long, value_parser = parse_entity)]
    pub entity: Option<EntityType>,
    #[arg(long)]
    pub status: Option<JobStatus>,
    /// Only jobs uploaded by this actor
    #[arg(long)]
    pub actor: Option<i64>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(value_parser = parse_job)]
    pub job: Uuid,
    /// Emit the full job document as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_entity(value: &str) -> Result<EntityType, String> {
    value.parse().map_err(|err: crate::error::ImportError| err.to_string())
}

fn parse_job(value: &str) -> Result<Uuid, String> {
    crate::job::parse_job_id(value).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn malformed_job_id_is_rejected_at_parse_time() {
        let parsed = Cli::try_parse_from(["crm-import", "show", "nope"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn map_requires_file_or_auto() {
        let id = Uuid::new_v4().to_string();
        assert!(Cli::try_parse_from(["crm-import", "map", id.as_str()]).is_err());
        assert!(Cli::try_parse_from(["crm-import", "map", id.as_str(), "--auto"]).is_ok());
    }
}
