//! wgmesh - WireGuard hub-and-spoke config synthesis
//!
//! Reads a mesh description and writes one wg-quick config per node.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wgmesh::config::WgMeshConfig;
use wgmesh::error::{Error, Result};
use wgmesh::keys::{KeyProvider, PrivateKey, WgCommandKeyProvider, X25519KeyProvider};
use wgmesh::render::render;
use wgmesh::synth::{MeshConfigs, MeshSynthesizer};
use wgmesh::writer::{ConfigWriter, FileConfigWriter, DEFAULT_MODE};

/// wgmesh - WireGuard hub-and-spoke config synthesis
#[derive(Parser)]
#[command(name = "wgmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the mesh description
    #[arg(short, long, default_value = "wgmesh.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [logging] level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Key generation backend
    #[arg(long, value_enum, default_value_t = KeyBackend::Native)]
    keys: KeyBackend,

    /// Timeout for each `wg` invocation, in seconds
    #[arg(long, default_value_t = 10)]
    wg_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyBackend {
    /// Generate keys in-process (X25519)
    Native,
    /// Shell out to `wg genkey` / `wg pubkey`
    Wg,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the mesh and write every node's config
    Generate {
        /// Output directory (overrides [output] directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print configs instead of writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Synthesize the mesh and print configs to stdout
    Show {
        /// Only print this node
        name: Option<String>,
    },

    /// Validate the mesh description without generating keys
    Validate,

    /// Write a starter mesh description
    Init {
        /// Output path for the description
        #[arg(short, long, default_value = "wgmesh.toml")]
        output: PathBuf,

        /// Server interface name
        #[arg(long, default_value = "wg0")]
        name: String,

        /// Public host:port peers dial
        #[arg(long, default_value = "vpn.example.com:51820")]
        endpoint: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Generate a private key (printed, or saved owner-only)
    Genkey {
        /// Save the private key here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read a private key on stdin and print its public key
    Pubkey,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| configured_log_level(&cli.config))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    let result = match &cli.command {
        Commands::Generate { output, dry_run } => run_generate(&cli, output.as_deref(), *dry_run),
        Commands::Show { name } => run_show(&cli, name.as_deref()),
        Commands::Validate => run_validate(&cli.config),
        Commands::Init {
            output,
            name,
            endpoint,
            force,
        } => run_init(output, name, endpoint, *force),
        Commands::Genkey { output } => run_genkey(&cli, output.as_deref()),
        Commands::Pubkey => run_pubkey(&cli),
    };

    if let Err(e) = &result {
        tracing::error!("{}", e);
    }
    result
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// `[logging] level` from the config file, if it can be read
fn configured_log_level(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let config: WgMeshConfig = toml::from_str(&content).ok()?;
    Some(config.logging.level)
}

fn provider(cli: &Cli) -> Box<dyn KeyProvider> {
    match cli.keys {
        KeyBackend::Native => Box::new(X25519KeyProvider),
        KeyBackend::Wg => Box::new(WgCommandKeyProvider::new(Duration::from_secs(cli.wg_timeout))),
    }
}

fn load_config(path: &Path) -> Result<WgMeshConfig> {
    match WgMeshConfig::from_file(path) {
        Ok(config) => {
            tracing::info!("Loaded mesh {} from {:?}", config.server.name, path);
            Ok(config)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}", path);
            Err(e)
        }
    }
}

fn synthesize(cli: &Cli, config: &WgMeshConfig) -> Result<MeshConfigs> {
    let synth = MeshSynthesizer::new(provider(cli));
    synth.synthesize(&config.spec())
}

fn rendered(configs: &MeshConfigs) -> BTreeMap<String, String> {
    configs
        .iter()
        .map(|(name, node)| (name.clone(), render(node)))
        .collect()
}

fn print_configs(files: &BTreeMap<String, String>) {
    let mut first = true;
    for (name, text) in files {
        if !first {
            println!();
        }
        first = false;
        println!("# ===== {} =====", name);
        print!("{}", text);
    }
}

/// Synthesize and write every config
fn run_generate(cli: &Cli, output: Option<&Path>, dry_run: bool) -> Result<()> {
    let config = load_config(&cli.config)?;
    let files = rendered(&synthesize(cli, &config)?);

    if dry_run {
        print_configs(&files);
        return Ok(());
    }

    let mut writer = match output {
        Some(dir) => config.writer_at(dir),
        None => config.writer(),
    };
    writer.persist_all(&files)?;

    println!("✓ Wrote {} config(s):", files.len());
    for name in files.keys() {
        println!("  {}", writer.path_for(name).display());
    }
    Ok(())
}

/// Synthesize and print configs
fn run_show(cli: &Cli, name: Option<&str>) -> Result<()> {
    let config = load_config(&cli.config)?;
    let mut files = rendered(&synthesize(cli, &config)?);

    if let Some(name) = name {
        files.retain(|n, _| n == name);
        if files.is_empty() {
            return Err(Error::Config(format!("no node named '{}' in the mesh", name)));
        }
    }
    print_configs(&files);
    Ok(())
}

/// Validate the mesh description
fn run_validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let spec = config.spec();
    let nodes = if spec.options.generate_peers { spec.peers.len() + 1 } else { 1 };

    println!("✓ Configuration is valid");
    println!("  Server:   {}", spec.server.name);
    println!("  Peers:    {}", spec.peers.len());
    println!("  Pool:     {}", spec.options.pool);
    println!("  Configs:  {}", nodes);
    println!("  Output:   {}", config.output.directory.display());
    Ok(())
}

/// Write a starter mesh description
fn run_init(output: &Path, name: &str, endpoint: &str, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }

    let sample = WgMeshConfig::sample(name, endpoint);
    // Make sure what we write loads back
    WgMeshConfig::from_str(&sample)?;
    std::fs::write(output, sample)?;

    println!("✓ Mesh description written to {}", output.display());
    Ok(())
}

/// Generate a private key
fn run_genkey(cli: &Cli, output: Option<&Path>) -> Result<()> {
    let kp = provider(cli).generate_keypair()?;

    match output {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file = path
                .file_name()
                .and_then(|f| f.to_str())
                .ok_or_else(|| Error::Config(format!("invalid key path {}", path.display())))?;
            FileConfigWriter::new(dir)
                .with_extension("")
                .with_mode(DEFAULT_MODE)
                .persist(file, &format!("{}\n", kp.private.expose()))?;
            eprintln!("Private key saved to: {}", path.display());
            println!("{}", kp.public);
        }
        None => println!("{}", kp.private.expose()),
    }
    Ok(())
}

/// Print the public key for a private key read on stdin
fn run_pubkey(cli: &Cli) -> Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let private = PrivateKey::parse(&input)?;
    println!("{}", provider(cli).derive_public(&private)?);
    Ok(())
}
