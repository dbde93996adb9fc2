use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crdform_core::{Address, Diagnostic, StateStore};
use crdform_persist::SqliteStore;
use crdform_provider::Provider;
use crdform_schema::{AttrType, Attribute, Registry};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crdformctl", version, about = "crdform CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Directory of descriptor files and CRD manifests
    #[arg(long = "descriptors", env = "CRDFORM_DESCRIPTORS", global = true, default_value = "descriptors")]
    descriptors: PathBuf,

    /// SQLite state file (default: ~/.crdform/state.db)
    #[arg(long = "state", env = "CRDFORM_STATE_PATH", global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered resource types
    Types,
    /// Show the attribute tree of a resource type
    Schema {
        /// Resource type, e.g. "cert_manager_io_certificate_v1"
        type_name: String,
    },
    /// Validate a configuration file against a resource type
    Validate {
        type_name: String,
        /// YAML or JSON configuration ("-" for stdin)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Print the manifest a create would produce
    Render {
        type_name: String,
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Create a resource and record its state
    Create {
        /// Resource address, e.g. "cert_manager_io_certificate_v1.web"
        address: String,
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Replace a resource's document and record its state
    Update {
        address: String,
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Show the recorded state of a resource
    Read { address: String },
    /// Forget a resource
    Delete { address: String },
    /// List recorded resource addresses
    State,
}

fn init_tracing() {
    let env = std::env::var("CRDFORM_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CRDFORM_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CRDFORM_METRICS_ADDR; expected host:port");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let registry = Registry::load_dir(&cli.descriptors)
        .with_context(|| format!("loading descriptors from {}", cli.descriptors.display()))?;
    let provider = Provider::new(Arc::new(registry));

    match &cli.command {
        Commands::Types => {
            let names = provider.registry().type_names();
            match cli.output {
                Output::Human => {
                    for name in names {
                        if let Ok(res) = provider.registry().lookup(name) {
                            let scope = if res.descriptor.namespaced { "namespaced" } else { "cluster" };
                            println!("{} • {} • {}", name, res.descriptor.gvk, scope);
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&names)?),
            }
        }
        Commands::Schema { type_name } => {
            info!(type_name = %type_name, "schema invoked");
            let schema = provider.schema(type_name)?;
            match cli.output {
                Output::Human => {
                    if let Some(d) = &schema.description {
                        println!("# {}", d);
                    }
                    for attr in &schema.attributes {
                        print_attribute(attr, 0);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(schema)?),
            }
        }
        Commands::Validate { type_name, file } => {
            let config = read_config(file)?;
            match provider.validate(type_name, &config) {
                Ok(()) => match cli.output {
                    Output::Human => println!("{}: configuration is valid", type_name),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&Vec::<Diagnostic>::new())?),
                },
                Err(e) => return Err(report(cli.output, e)),
            }
        }
        Commands::Render { type_name, file } => {
            let config = read_config(file)?;
            match provider.render(type_name, &config) {
                Ok(yaml) => print!("{}", yaml),
                Err(e) => return Err(report(cli.output, e)),
            }
        }
        Commands::Create { address, file } | Commands::Update { address, file } => {
            let address = Address::from_str(address)?;
            let config = read_config(file)?;
            let store = open_store(cli.state.as_deref())?;
            let res = if matches!(cli.command, Commands::Create { .. }) {
                provider.create(&address, &config, &store)
            } else {
                provider.update(&address, &config, &store)
            };
            match res {
                Ok(state) => match cli.output {
                    Output::Human => println!("{} id={}", address, state.id),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&state)?),
                },
                Err(e) => return Err(report(cli.output, e)),
            }
        }
        Commands::Read { address } => {
            let address = Address::from_str(address)?;
            let store = open_store(cli.state.as_deref())?;
            let Some(state) = store.get(&address)? else { bail!("no state recorded for {}", address) };
            let state = provider.read(state);
            match cli.output {
                Output::Human => print!("{}", state.yaml),
                Output::Json => println!("{}", serde_json::to_string_pretty(&state)?),
            }
        }
        Commands::Delete { address } => {
            let address = Address::from_str(address)?;
            let store = open_store(cli.state.as_deref())?;
            let Some(state) = store.get(&address)? else { bail!("no state recorded for {}", address) };
            provider.delete(&state);
            store.remove(&address)?;
            info!(address = %address, "state removed");
            if cli.output == Output::Human {
                println!("- {}", address);
            }
        }
        Commands::State => {
            let store = open_store(cli.state.as_deref())?;
            let addresses: Vec<String> = store.list()?.iter().map(|a| a.to_string()).collect();
            match cli.output {
                Output::Human => {
                    for a in addresses {
                        println!("{}", a);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&addresses)?),
            }
        }
    }

    Ok(())
}

fn open_store(path: Option<&Path>) -> Result<SqliteStore> {
    match path {
        Some(p) => SqliteStore::open(p),
        None => SqliteStore::open_default(),
    }
}

/// Read a configuration file (YAML, which covers JSON) keyed by wire names.
fn read_config(path: &Path) -> Result<serde_json::Value> {
    let text = if path.as_os_str() == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s).context("reading configuration from stdin")?;
        s
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    let value: serde_json::Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing configuration {}", path.display()))?;
    Ok(value)
}

/// Print diagnostics for a failed call and turn it into the process error.
fn report(output: Output, err: crdform_core::Error) -> anyhow::Error {
    let diags = err.diagnostics();
    match output {
        Output::Human => {
            for d in &diags {
                eprintln!("Error: {}", d);
            }
        }
        Output::Json => match serde_json::to_string_pretty(&diags) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("encoding diagnostics: {}", e),
        },
    }
    anyhow!("{} problem(s) reported", diags.len())
}

fn print_attribute(attr: &Attribute, depth: usize) {
    let indent = "  ".repeat(depth);
    let card = match attr.cardinality {
        crdform_core::Cardinality::Required => "required",
        crdform_core::Cardinality::Optional => "optional",
        crdform_core::Cardinality::Computed => "computed",
    };
    let checks: Vec<String> = attr.validators.iter().map(|v| v.describe()).collect();
    if checks.is_empty() {
        println!("{}{:<24} {:<14} {}", indent, attr.name, attr.ty.label(), card);
    } else {
        println!("{}{:<24} {:<14} {:<9} {}", indent, attr.name, attr.ty.label(), card, checks.join("; "));
    }
    match &attr.ty {
        AttrType::Object { attributes } => {
            for child in attributes {
                print_attribute(child, depth + 1);
            }
        }
        AttrType::List { element } | AttrType::Map { element } => {
            if let AttrType::Object { attributes } = &element.ty {
                for child in attributes {
                    print_attribute(child, depth + 1);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_commands() {
        let cli = Cli::try_parse_from(["crdformctl", "-o", "json", "create", "x_io_foo_v1.web", "-f", "web.yaml"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Create { address, file } => {
                assert_eq!(address, "x_io_foo_v1.web");
                assert_eq!(file, PathBuf::from("web.yaml"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn config_files_may_be_yaml_or_json() {
        let dir = std::env::temp_dir();
        let stamp = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let yaml = dir.join(format!("crdformctl-{}.yaml", stamp));
        let json = dir.join(format!("crdformctl-{}.json", stamp));
        std::fs::write(&yaml, "metadata:\n  name: web\nspec:\n  replicas: 2\n").unwrap();
        std::fs::write(&json, r#"{"metadata":{"name":"web"},"spec":{"replicas":2}}"#).unwrap();
        assert_eq!(read_config(&yaml).unwrap(), read_config(&json).unwrap());
        let _ = std::fs::remove_file(yaml);
        let _ = std::fs::remove_file(json);
    }
}
