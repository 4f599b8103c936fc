use clap::{Args, Parser, Subcommand};
use fieldseal::batch::{self, BatchAction, BatchOptions, Destination};
use fieldseal::config::{self, Config};
use fieldseal::error::{ConfigError, Result};
use fieldseal::{create_encryption_middleware, document, FieldCipher, MasterKey};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// fieldseal: field-level encryption at rest for JSON documents
#[derive(Parser, Debug)]
#[command(
    name = "fieldseal",
    version,
    about = "Field-level AES-256-GCM encryption for JSON documents 🔒",
    long_about = "fieldseal replaces sensitive fields in JSON documents with self-describing \
                  AES-256-GCM envelopes. Each envelope carries its own PBKDF2 salt and IV; \
                  only the master key, supplied through an environment variable, has to be \
                  managed."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (overrides default search)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Args, Debug)]
struct Target {
    /// JSON file, or directory of JSON files
    path: PathBuf,

    /// Collection whose field list to use (from the config file)
    #[arg(short = 'C', long, conflicts_with = "fields")]
    collection: Option<String>,

    /// Comma-separated field names or dotted paths
    #[arg(short, long, value_delimiter = ',')]
    fields: Option<Vec<String>>,

    /// Write results under this directory instead of in place
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "fieldseal.toml")]
        output: PathBuf,
    },

    /// Generate a new random master key
    Keygen,

    /// Show the fingerprint of the configured master key
    Fingerprint,

    /// Encrypt a single value (argument or stdin)
    Encrypt {
        /// Plaintext; read from stdin when omitted
        text: Option<String>,
    },

    /// Decrypt a single envelope (argument or stdin)
    Decrypt {
        /// Hex envelope; read from stdin when omitted
        envelope: Option<String>,
    },

    /// Seal the configured fields of JSON documents
    Seal {
        #[command(flatten)]
        target: Target,
    },

    /// Open sealed fields of JSON documents
    Open {
        #[command(flatten)]
        target: Target,

        /// Overwrite the input files with the opened documents
        #[arg(long, conflicts_with = "output")]
        in_place: bool,
    },

    /// Re-encrypt sealed fields under a new master key
    Rotate {
        #[command(flatten)]
        target: Target,

        /// Environment variable holding the new master key
        #[arg(long)]
        new_key_env: String,
    },

    /// Convert legacy `encrypted:<hex>` strings into sealed values
    Migrate {
        #[command(flatten)]
        target: Target,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Err(e) = run(cli) {
        eprintln!("{} {}", colored::Colorize::red("error:"), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "fieldseal=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Init { output } => cmd_init(output),
        Command::Keygen => cmd_keygen(),
        Command::Fingerprint => cmd_fingerprint(&cli),
        Command::Encrypt { text } => cmd_encrypt(&cli, text.as_deref()),
        Command::Decrypt { envelope } => cmd_decrypt(&cli, envelope.as_deref()),
        Command::Seal { target } => cmd_batch(&cli, target, BatchAction::Seal, false),
        Command::Open { target, in_place } => {
            cmd_batch(&cli, target, BatchAction::Open, *in_place)
        }
        Command::Rotate {
            target,
            new_key_env,
        } => cmd_rotate(&cli, target, new_key_env),
        Command::Migrate { target } => cmd_batch(&cli, target, BatchAction::Migrate, false),
    }
}

// ─── Command Implementations ────────────────────────────────────────────────

fn cmd_init(output: &Path) -> Result<()> {
    config::init_config(output)?;
    eprintln!(
        "{} Created configuration file: {}",
        colored::Colorize::green("✓"),
        output.display(),
    );
    eprintln!("  Generate a master key and export it, then run:");
    eprintln!(
        "  {} export FIELDSEAL_MASTER_KEY=$(fieldseal keygen)",
        colored::Colorize::bold("$")
    );
    eprintln!(
        "  {} fieldseal seal users.json -C users",
        colored::Colorize::bold("$")
    );
    Ok(())
}

fn cmd_keygen() -> Result<()> {
    let key = MasterKey::generate();
    println!("{}", key.expose_hex());
    eprintln!(
        "{} fingerprint {} (store this key safely; losing it orphans every envelope)",
        colored::Colorize::green("✓"),
        colored::Colorize::bold(key.fingerprint().as_str()),
    );
    Ok(())
}

fn cmd_fingerprint(cli: &Cli) -> Result<()> {
    let cfg = load_config(cli)?;
    let cipher = FieldCipher::from_settings(&cfg.settings)?;
    println!("{}", cipher.fingerprint());
    Ok(())
}

fn cmd_encrypt(cli: &Cli, text: Option<&str>) -> Result<()> {
    let cfg = load_config(cli)?;
    let cipher = FieldCipher::from_settings(&cfg.settings)?;
    let plaintext = arg_or_stdin(text)?;
    println!("{}", cipher.encrypt(&plaintext)?);
    Ok(())
}

fn cmd_decrypt(cli: &Cli, envelope: Option<&str>) -> Result<()> {
    let cfg = load_config(cli)?;
    let cipher = FieldCipher::from_settings(&cfg.settings)?;
    let envelope = arg_or_stdin(envelope)?;
    let plaintext = cipher
        .decrypt(envelope.trim())
        .ok_or_else(|| anyhow::anyhow!("field unavailable: envelope could not be decrypted"))?;
    println!("{plaintext}");
    Ok(())
}

fn cmd_batch(cli: &Cli, target: &Target, action: BatchAction<'_>, in_place: bool) -> Result<()> {
    let cfg = load_config(cli)?;
    let cipher = Arc::new(FieldCipher::from_settings(&cfg.settings)?);
    run_target(cli, &cfg, target, cipher, action, in_place)
}

fn cmd_rotate(cli: &Cli, target: &Target, new_key_env: &str) -> Result<()> {
    let cfg = load_config(cli)?;
    let current = Arc::new(FieldCipher::from_settings(&cfg.settings)?);
    let next = FieldCipher::with_iterations(
        MasterKey::from_env(new_key_env)?,
        cfg.settings.kdf_iterations,
    )?;

    if current.fingerprint() == next.fingerprint() {
        return Err(anyhow::anyhow!("new key is identical to the current key").into());
    }

    eprintln!(
        "  Rotating {} → {}",
        current.fingerprint(),
        colored::Colorize::bold(next.fingerprint().as_str()),
    );
    run_target(cli, &cfg, target, current, BatchAction::Rotate(&next), false)
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn run_target(
    cli: &Cli,
    cfg: &Config,
    target: &Target,
    cipher: Arc<FieldCipher>,
    action: BatchAction<'_>,
    in_place: bool,
) -> Result<()> {
    let fields = resolve_fields(cfg, target)?;
    let middleware = create_encryption_middleware(cipher, &fields)?;
    let files = document::collect_json_files(&target.path)?;

    if files.is_empty() {
        eprintln!("No JSON documents found under {}.", target.path.display());
        return Ok(());
    }

    let destination = match (&target.output, action) {
        (Some(dir), _) => Destination::Directory(dir.clone()),
        (None, BatchAction::Open) if !in_place => Destination::Stdout,
        (None, _) => Destination::InPlace,
    };
    let root = if target.path.is_dir() {
        target.path.clone()
    } else {
        target.path.parent().map(Path::to_path_buf).unwrap_or_default()
    };

    let quiet = destination == Destination::Stdout;
    if !quiet {
        print_header(&action.to_string());
    }

    let opts = BatchOptions {
        destination,
        root,
        progress: !quiet && files.len() > 1,
        verbose: cli.verbose,
    };
    let summary = batch::run_batch(&files, action, &middleware, &opts)?;

    if !quiet {
        batch::print_batch_summary(action, &summary);
    }
    Ok(())
}

fn resolve_fields(cfg: &Config, target: &Target) -> Result<Vec<String>> {
    if let Some(fields) = &target.fields {
        return Ok(fields.clone());
    }
    match &target.collection {
        Some(name) => Ok(cfg.collection_fields(name)?.to_vec()),
        None => Err(ConfigError::Validation {
            message: "specify --collection or --fields".to_string(),
        }
        .into()),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(path) = &cli.config {
        config::load_config_from(path)
    } else {
        config::load_config_or_default()
    }
}

fn arg_or_stdin(arg: Option<&str>) -> Result<String> {
    match arg {
        Some(value) => Ok(value.to_string()),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

fn print_header(action: &str) {
    eprintln!();
    eprintln!(
        "  {} fieldseal v{} — {action}",
        colored::Colorize::bold("🔒"),
        env!("CARGO_PKG_VERSION"),
    );
    eprintln!();
}
