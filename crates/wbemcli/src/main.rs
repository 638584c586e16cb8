use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd_class;
mod cmd_enum;
mod cmd_get;
mod cmd_qualifiers;
mod common;

use common::Target;

#[derive(Parser, Debug)]
#[command(name = "wbemcli", version, about = "WBEM client CLI")]
struct Cli {
    /// WBEM server URL, e.g. https://srv:5989 (scheme and port default)
    #[arg(long, env = "WBEM_URL", default_value = "http://localhost")]
    url: String,
    #[arg(short, long, env = "WBEM_USER")]
    user: Option<String>,
    #[arg(short, long, env = "WBEM_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Default namespace (root/cimv2 if not set)
    #[arg(short, long)]
    namespace: Option<String>,
    /// Skip TLS certificate verification
    #[arg(long)]
    no_verify: bool,
    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Enumerate instances of a class
    EnumInstances {
        class: String,
        /// Include properties of subclasses
        #[arg(long)]
        deep: bool,
        /// Only return these properties (comma separated)
        #[arg(long, value_delimiter = ',')]
        properties: Option<Vec<String>>,
        /// Objects per pull request
        #[arg(long, default_value_t = wbem::DEFAULT_ITER_MAX_OBJECT_COUNT)]
        batch: u32,
    },
    /// Enumerate instance paths of a class
    EnumPaths {
        class: String,
        #[arg(long, default_value_t = wbem::DEFAULT_ITER_MAX_OBJECT_COUNT)]
        batch: u32,
    },
    /// Get one instance by WBEM URI, e.g. 'CIM_Foo.Name="bar"'
    GetInstance {
        uri: String,
        #[arg(long, value_delimiter = ',')]
        properties: Option<Vec<String>>,
    },
    /// List class names below a class (or the top-level classes)
    ClassNames {
        class: Option<String>,
        #[arg(long)]
        deep: bool,
    },
    /// Show a class declaration
    GetClass {
        class: String,
        #[arg(long)]
        local_only: bool,
    },
    /// List qualifier declarations
    Qualifiers,
    /// Check whether a class derives from another
    IsSubclass { class: String, superclass: String },
}

fn main() -> Result<()> {
    let Cli {
        url,
        user,
        password,
        namespace,
        no_verify,
        timeout,
        json,
        verbose,
        cmd,
    } = Cli::parse();

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let target = Target {
        url,
        user,
        password,
        namespace,
        no_verify,
        timeout_s: timeout,
    };

    match cmd {
        Cmd::EnumInstances {
            class,
            deep,
            properties,
            batch,
        } => cmd_enum::run_instances(&target, class, deep, properties, batch, json)?,
        Cmd::EnumPaths { class, batch } => cmd_enum::run_paths(&target, class, batch, json)?,
        Cmd::GetInstance { uri, properties } => cmd_get::run(&target, uri, properties, json)?,
        Cmd::ClassNames { class, deep } => cmd_class::run_names(&target, class, deep, json)?,
        Cmd::GetClass { class, local_only } => cmd_class::run_get(&target, class, local_only, json)?,
        Cmd::Qualifiers => cmd_qualifiers::run(&target, json)?,
        Cmd::IsSubclass { class, superclass } => {
            cmd_class::run_is_subclass(&target, class, superclass, json)?
        }
    };

    Ok(())
}
