//! wing: management CLI for the proxy control plane.
//!
//! Every command opens the store, starts the control plane in api-only mode
//! (reloads are acknowledged without an engine) and runs one operation.
//! Embedders that link a dataplane engine use `wing::lifecycle::start`.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use wing::config::loader::load_or_default;
use wing::lifecycle::{signals, start_api_only};
use wing::observability::init_logging;
use wing::runtime::{PolicyParam, TomlCompiler};
use wing::store::{MemoryStore, ProfileKind, RecordId};

#[derive(Parser)]
#[command(name = "wing")]
#[command(about = "Control plane for a transparent proxy engine", long_about = None)]
struct Cli {
    /// Daemon configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage global, dns and routing profiles
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Manage outbound groups
    #[command(subcommand)]
    Group(GroupCommand),
    /// Manage subscriptions
    #[command(subcommand)]
    Subscription(SubscriptionCommand),
    /// Manage standalone nodes
    #[command(subcommand)]
    Node(NodeCommand),
    /// Print the runtime configuration built from the current selection
    Assemble,
    /// Apply the current selection, or stop serving with --dry
    Run {
        #[arg(long)]
        dry: bool,
    },
    /// Show the running state and whether it is stale
    Status,
    /// Keep the api-only control plane up until SIGINT/SIGTERM
    Serve,
}

#[derive(Args)]
struct ProfileText {
    /// Read the profile text from a file
    #[arg(long, conflicts_with = "text")]
    file: Option<PathBuf>,
    /// Profile text inline
    #[arg(long)]
    text: Option<String>,
}

impl ProfileText {
    fn read(&self) -> std::io::Result<String> {
        match (&self.file, &self.text) {
            (Some(path), _) => fs::read_to_string(path),
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Ok(String::new()),
        }
    }
}

#[derive(Subcommand)]
enum ProfileCommand {
    Create {
        kind: ProfileKind,
        name: String,
        #[command(flatten)]
        text: ProfileText,
    },
    Update {
        kind: ProfileKind,
        id: RecordId,
        /// Version the update was prepared against
        #[arg(long)]
        version: u32,
        #[command(flatten)]
        text: ProfileText,
    },
    Select {
        kind: ProfileKind,
        id: RecordId,
    },
    Remove {
        kind: ProfileKind,
        id: RecordId,
    },
    Rename {
        kind: ProfileKind,
        id: RecordId,
        name: String,
    },
    List {
        kind: ProfileKind,
    },
}

#[derive(Subcommand)]
enum GroupCommand {
    Add {
        name: String,
        #[arg(long, default_value = "random")]
        policy: String,
        /// Policy parameter, `value` or `key=value`; repeatable
        #[arg(long = "param")]
        params: Vec<String>,
    },
    List,
}

#[derive(Subcommand)]
enum SubscriptionCommand {
    Add {
        link: String,
        #[arg(long)]
        tag: Option<String>,
        /// Resolved node as `name=link`; repeatable
        #[arg(long = "node")]
        nodes: Vec<String>,
        /// Group to attach the subscription to; repeatable
        #[arg(long = "group")]
        groups: Vec<RecordId>,
    },
}

#[derive(Subcommand)]
enum NodeCommand {
    Add {
        name: String,
        link: String,
        #[arg(long)]
        tag: Option<String>,
        /// Group to attach the node to; repeatable
        #[arg(long = "group")]
        groups: Vec<RecordId>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;
    init_logging(&config.observability.log_level, config.observability.json);

    let store = Arc::new(MemoryStore::open(&config.store.path)?);
    let runtime = start_api_only(&config, store.clone(), TomlCompiler);
    let service = runtime.service().clone();

    match cli.command {
        Commands::Profile(command) => match command {
            ProfileCommand::Create { kind, name, text } => {
                print_json(&service.create_profile(kind, &name, &text.read()?)?)?;
            }
            ProfileCommand::Update {
                kind,
                id,
                version,
                text,
            } => {
                print_json(&service.update_profile(kind, id, &text.read()?, version)?)?;
            }
            ProfileCommand::Select { kind, id } => service.select_profile(kind, id).await?,
            ProfileCommand::Remove { kind, id } => service.remove_profile(kind, id).await?,
            ProfileCommand::Rename { kind, id, name } => service.rename_profile(kind, id, &name)?,
            ProfileCommand::List { kind } => print_json(&service.list_profiles(kind)?)?,
        },
        Commands::Group(command) => match command {
            GroupCommand::Add {
                name,
                policy,
                params,
            } => {
                let params = params.iter().map(|p| parse_policy_param(p)).collect();
                print_json(&store.add_group(&name, &policy, params)?)?;
            }
            GroupCommand::List => print_json(&store.list_groups())?,
        },
        Commands::Subscription(SubscriptionCommand::Add {
            link,
            tag,
            nodes,
            groups,
        }) => {
            let nodes = nodes
                .iter()
                .map(|n| split_pair(n).ok_or_else(|| format!("expected name=link, got '{}'", n)))
                .collect::<Result<Vec<_>, _>>()?;
            let created = store.add_subscription(&link, tag.as_deref(), nodes)?;
            for group in groups {
                store.attach_subscription(group, created.0.id)?;
            }
            print_json(&created)?;
        }
        Commands::Node(NodeCommand::Add {
            name,
            link,
            tag,
            groups,
        }) => {
            let node = store.add_node(&name, &link, tag.as_deref())?;
            for group in groups {
                store.attach_node(group, node.id)?;
            }
            print_json(&node)?;
        }
        Commands::Assemble => print_json(&service.assemble()?)?,
        Commands::Run { dry } => print_json(&service.run(dry).await?)?,
        Commands::Status => print_json(&service.status()?)?,
        Commands::Serve => {
            tokio::spawn(signals::shutdown_on_signal(runtime.shutdown_handle()));
            return Ok(runtime.wait().await?);
        }
    }

    runtime.shutdown().await?;
    Ok(())
}

fn split_pair(s: &str) -> Option<(String, String)> {
    let (name, link) = s.split_once('=')?;
    Some((name.to_string(), link.to_string()))
}

fn parse_policy_param(s: &str) -> PolicyParam {
    match split_pair(s) {
        Some((key, val)) => PolicyParam { key: Some(key), val },
        None => PolicyParam {
            key: None,
            val: s.to_string(),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
