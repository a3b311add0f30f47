use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use psis_adapters::DocumentRequest;
use psis_core::{grant_outreach_email, replacement_targets, NewSchool};
use psis_sync::{today, Credential, SyncConfig, SyncPipeline};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

const MAX_DAYS: i64 = 3650;
const MAX_YEARS: i64 = 30;

#[derive(Debug, Parser)]
#[command(name = "psis")]
#[command(about = "Public sales intelligence: procurement bids, grant news and faculty contacts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or patch the local store.
    Init,
    /// Store connectivity, row counts and which credentials are configured.
    Status,
    /// Bid notices from the last N days.
    SyncRecent {
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(0..=MAX_DAYS))]
        days: u32,
    },
    /// Bid notices for the last N years, in 30-day windows.
    SyncHistorical {
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(0..=MAX_YEARS))]
        years: u32,
    },
    /// Pre-spec notices from the last N days.
    SyncPreSpec {
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(0..=MAX_DAYS))]
        days: u32,
    },
    /// Grant-award news; `--reset` empties the grants table first.
    SyncGrants {
        #[arg(long)]
        reset: bool,
    },
    /// Search a school's faculty pages and store extracted contacts.
    DiscoverContacts { school: String },
    /// Draft a spec-in proposal through the LLM.
    GenerateDoc(GenerateDocArgs),
    /// Register a target school.
    AddSchool {
        school_name: String,
        #[arg(long, default_value = "")]
        category: String,
        #[arg(long, default_value = "")]
        contact: String,
        #[arg(long, default_value = "")]
        equipments: String,
    },
    /// Dump a table as JSON, newest first.
    List {
        #[arg(value_enum)]
        table: Table,
    },
    /// Bids contracted three to five years ago.
    ReplacementTargets,
    /// Congratulation mail for the newest grant.
    OutreachEmail,
}

#[derive(Debug, clap::Args)]
struct GenerateDocArgs {
    /// Take school, project and budget from this grant row.
    #[arg(long)]
    grant_id: Option<i64>,
    #[arg(long)]
    school: Option<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    budget: Option<String>,
    #[arg(long)]
    solution: String,
    #[arg(long, default_value = "")]
    extra: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Table {
    Bids,
    Grants,
    Contacts,
    Schools,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    db_path: String,
    connected: bool,
    bids: usize,
    grants: usize,
    contacts: usize,
    schools: usize,
    credentials: BTreeMap<&'static str, bool>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;
    let pipeline = SyncPipeline::new(&config)?;
    pipeline
        .store()
        .init_schema()
        .await
        .with_context(|| format!("initialising store at {}", config.db_path.display()))?;
    let store = pipeline.store();

    match cli.command {
        Commands::Init => {
            info!(db_path = %config.db_path.display(), "store ready");
        }
        Commands::Status => {
            let report = StatusReport {
                db_path: config.db_path.display().to_string(),
                connected: store.check_connection().await,
                bids: store.all_bids().await?.len(),
                grants: store.all_grants().await?.len(),
                contacts: store.all_contacts().await?.len(),
                schools: store.all_schools().await?.len(),
                credentials: Credential::ALL
                    .into_iter()
                    .map(|c| (c.key(), pipeline.credentials().is_set(c)))
                    .collect(),
            };
            print_json(&report)?;
        }
        Commands::SyncRecent { days } => {
            let added = pipeline.sync_recent(days).await?;
            println!("sync-recent complete: added={added}");
        }
        Commands::SyncHistorical { years } => {
            let report = pipeline.sync_historical(years).await?;
            print_json(&report)?;
        }
        Commands::SyncPreSpec { days } => {
            let added = pipeline.sync_pre_spec(days).await?;
            println!("sync-pre-spec complete: added={added}");
        }
        Commands::SyncGrants { reset } => {
            let report = pipeline.sync_grants(reset).await?;
            print_json(&report)?;
        }
        Commands::DiscoverContacts { school } => {
            let school = school.trim();
            if school.is_empty() {
                bail!("school name must not be empty");
            }
            let report = pipeline.discover_contacts(school).await?;
            print_json(&report)?;
        }
        Commands::GenerateDoc(args) => {
            let request = document_request(&pipeline, args).await?;
            let document = pipeline.generate_document(&request).await?;
            println!("{document}");
        }
        Commands::AddSchool {
            school_name,
            category,
            contact,
            equipments,
        } => {
            let id = store
                .insert_school(&NewSchool {
                    school_name,
                    category,
                    contact,
                    existing_equipments: equipments,
                })
                .await?;
            println!("school added: id={id}");
        }
        Commands::List { table } => match table {
            Table::Bids => print_json(&store.all_bids().await?)?,
            Table::Grants => print_json(&store.all_grants().await?)?,
            Table::Contacts => print_json(&store.all_contacts().await?)?,
            Table::Schools => print_json(&store.all_schools().await?)?,
        },
        Commands::ReplacementTargets => {
            let bids = store.all_bids().await?;
            print_json(&replacement_targets(&bids, today()))?;
        }
        Commands::OutreachEmail => {
            let grants = store.all_grants().await?;
            let Some(newest) = grants.first() else {
                bail!("no grants stored yet; run sync-grants first");
            };
            println!("{}", grant_outreach_email(newest));
        }
    }

    Ok(())
}

/// Explicit flags win over fields taken from `--grant-id`.
async fn document_request(pipeline: &SyncPipeline, args: GenerateDocArgs) -> Result<DocumentRequest> {
    let grant = match args.grant_id {
        Some(id) => {
            let grants = pipeline.store().all_grants().await?;
            let grant = grants
                .into_iter()
                .find(|g| g.id == id)
                .with_context(|| format!("grant {id} not found"))?;
            Some(grant)
        }
        None => None,
    };
    let pick = |flag: Option<String>, from_grant: Option<&str>| {
        flag.or_else(|| from_grant.map(str::to_string)).unwrap_or_default()
    };
    let request = DocumentRequest {
        school_name: pick(args.school, grant.as_ref().map(|g| g.selected_school.as_str())),
        project_name: pick(args.project, grant.as_ref().map(|g| g.project_name.as_str())),
        budget: pick(args.budget, grant.as_ref().map(|g| g.budget_scale.as_str())),
        solution_name: args.solution,
        extra_points: args.extra,
    };
    if request.school_name.trim().is_empty() || request.project_name.trim().is_empty() {
        bail!("school and project are required (pass them or --grant-id)");
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse_with_defaults() {
        let cli = Cli::try_parse_from(["psis", "sync-recent"]).unwrap();
        assert!(matches!(cli.command, Commands::SyncRecent { days: 7 }));

        let cli = Cli::try_parse_from(["psis", "sync-historical", "--years", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::SyncHistorical { years: 3 }));

        let cli = Cli::try_parse_from(["psis", "sync-grants", "--reset"]).unwrap();
        assert!(matches!(cli.command, Commands::SyncGrants { reset: true }));

        let cli = Cli::try_parse_from(["psis", "list", "contacts"]).unwrap();
        assert!(matches!(cli.command, Commands::List { table: Table::Contacts }));
    }

    #[test]
    fn lookback_arguments_are_bounded() {
        assert!(Cli::try_parse_from(["psis", "sync-historical", "--years", "4294967295"]).is_err());
        assert!(Cli::try_parse_from(["psis", "sync-recent", "--days", "-1"]).is_err());
        assert!(Cli::try_parse_from(["psis", "sync-pre-spec", "--days", "3651"]).is_err());

        let cli = Cli::try_parse_from(["psis", "sync-pre-spec", "--days", "3650"]).unwrap();
        assert!(matches!(cli.command, Commands::SyncPreSpec { days: 3650 }));
    }

    #[test]
    fn generate_doc_requires_a_solution() {
        assert!(Cli::try_parse_from(["psis", "generate-doc", "--school", "한국대학교"]).is_err());
        let cli = Cli::try_parse_from([
            "psis",
            "generate-doc",
            "--grant-id",
            "4",
            "--solution",
            "3D CAD 패키지",
        ])
        .unwrap();
        match cli.command {
            Commands::GenerateDoc(args) => {
                assert_eq!(args.grant_id, Some(4));
                assert_eq!(args.extra, "");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
