//! pqlink CLI: identity management and the drone/GCS proxy entrypoints.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use pqlink::core::Config;
use pqlink::crypto::provider::{PqPrimitives, PqcleanProvider};
use pqlink::identity::{self, SigningIdentity};
use pqlink::proxy::{self, ConsoleCommand, CountersSnapshot, RoleIdentity};
use pqlink::suites::{self, Suite};
use pqlink::Role;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(
    name = "pqlink",
    version,
    about = "Post-quantum secure UDP transport proxy for drone / ground-control links"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a persistent GCS signing identity
    InitIdentity {
        /// Suite whose signature algorithm the identity is generated for
        #[arg(long, default_value = "cs-mlkem768-aesgcm-mldsa65")]
        suite: String,
        /// Directory for the key files
        #[arg(long, default_value = "secrets")]
        output_dir: PathBuf,
    },
    /// Start the GCS proxy (handshake server, rekey initiator)
    Gcs {
        #[command(flatten)]
        suite: SuiteSelection,
        /// Path to the signing secret key (default: secrets/gcs_signing.key)
        #[arg(long)]
        gcs_secret_file: Option<PathBuf>,
        /// Use an ephemeral signing keypair (development only)
        #[arg(long)]
        ephemeral: bool,
        /// Auto-stop after N seconds
        #[arg(long)]
        stop_seconds: Option<f64>,
        /// Enable the interactive in-band rekey console on stdin
        #[arg(long)]
        control_manual: bool,
        /// Write the final counters as JSON to this path
        #[arg(long)]
        json_out: Option<PathBuf>,
        /// Suppress informational output
        #[arg(long)]
        quiet: bool,
    },
    /// Start the drone proxy (handshake client)
    Drone {
        #[command(flatten)]
        suite: SuiteSelection,
        /// Path to the GCS signature public key (default: secrets/gcs_signing.pub)
        #[arg(long)]
        peer_pubkey_file: Option<PathBuf>,
        /// GCS signature public key as hex
        #[arg(long)]
        gcs_pub_hex: Option<String>,
        /// Auto-stop after N seconds
        #[arg(long)]
        stop_seconds: Option<f64>,
        /// Write the final counters as JSON to this path
        #[arg(long)]
        json_out: Option<PathBuf>,
        /// Suppress informational output
        #[arg(long)]
        quiet: bool,
    },
}

/// Either a full suite ID or its three components.
#[derive(Args)]
struct SuiteSelection {
    /// Suite identifier (e.g. cs-mlkem768-aesgcm-mldsa65)
    #[arg(long)]
    suite: Option<String>,
    /// KEM alias (e.g. ML-KEM-768, kyber768); requires --aead and --sig
    #[arg(long)]
    kem: Option<String>,
    /// AEAD alias (e.g. AES-GCM, chacha20poly1305)
    #[arg(long)]
    aead: Option<String>,
    /// Signature alias (e.g. ML-DSA-65, falcon512)
    #[arg(long)]
    sig: Option<String>,
}

impl SuiteSelection {
    fn resolve(&self) -> Result<&'static Suite, BoxError> {
        let components = [&self.kem, &self.aead, &self.sig];
        match (&self.suite, components.iter().any(|c| c.is_some())) {
            (Some(_), true) => Err("--suite cannot be combined with --kem/--aead/--sig".into()),
            (Some(suite), false) => Ok(suites::get(suite)?),
            (None, true) => {
                let (Some(kem), Some(aead), Some(sig)) = (&self.kem, &self.aead, &self.sig) else {
                    return Err("--kem, --aead, and --sig must be provided together".into());
                };
                let suite_id = suites::build_suite_id(kem, aead, sig)?;
                Ok(suites::get(&suite_id)?)
            }
            (None, false) => Err("a suite is required (--suite or --kem/--aead/--sig)".into()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let quiet = match &cli.command {
        Command::Gcs { quiet, .. } | Command::Drone { quiet, .. } => *quiet,
        Command::InitIdentity { .. } => false,
    };
    init_tracing(quiet);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), BoxError> {
    let provider: Arc<dyn PqPrimitives> = Arc::new(PqcleanProvider);
    match cli.command {
        Command::InitIdentity { suite, output_dir } => {
            init_identity(&suite, &output_dir, provider.as_ref())
        }
        Command::Gcs {
            suite,
            gcs_secret_file,
            ephemeral,
            stop_seconds,
            control_manual,
            json_out,
            quiet,
        } => {
            let suite = suite.resolve()?;
            let config = Config::from_env()?;
            let signing = if ephemeral {
                eprintln!("WARNING: using an ephemeral signing key; not suitable for production");
                let signing = SigningIdentity::generate(suite, provider.as_ref())?;
                eprintln!("Public key (hex): {}", hex::encode(signing.public()));
                signing
            } else {
                let secret_path = gcs_secret_file
                    .unwrap_or_else(|| Path::new("secrets").join(identity::SECRET_FILE));
                if !secret_path.exists() {
                    return Err(format!(
                        "secret key file not found: {} (run `pqlink init-identity` or use --ephemeral)",
                        secret_path.display()
                    )
                    .into());
                }
                SigningIdentity::load(&secret_path, suite)?
            };

            let console = control_manual.then(spawn_console);
            if control_manual && !config.enable_packet_type {
                eprintln!("Warning: ENABLE_PACKET_TYPE is disabled; control-plane packets will not be processed");
            }
            let counters = proxy::run(
                Role::Gcs,
                suite,
                RoleIdentity::Gcs(signing),
                config,
                provider,
                stop_seconds.map(Duration::from_secs_f64),
                console,
            )
            .await?;
            report(Role::Gcs, suite, &counters, json_out.as_deref(), quiet)
        }
        Command::Drone {
            suite,
            peer_pubkey_file,
            gcs_pub_hex,
            stop_seconds,
            json_out,
            quiet,
        } => {
            let suite = suite.resolve()?;
            let config = Config::from_env()?;
            let gcs_sig_public = load_gcs_public(peer_pubkey_file.as_deref(), gcs_pub_hex.as_deref())?;
            let counters = proxy::run(
                Role::Drone,
                suite,
                RoleIdentity::Drone { gcs_sig_public },
                config,
                provider,
                stop_seconds.map(Duration::from_secs_f64),
                None,
            )
            .await?;
            report(Role::Drone, suite, &counters, json_out.as_deref(), quiet)
        }
    }
}

fn init_identity(suite: &str, output_dir: &Path, provider: &dyn PqPrimitives) -> Result<(), BoxError> {
    let suite = suites::get(suite)?;
    let identity = SigningIdentity::generate(suite, provider)?;
    let (secret_path, public_path) = identity.save(output_dir)?;
    println!("Created GCS signing identity ({}):", suite.sig_name);
    println!("  Secret: {}", secret_path.display());
    println!("  Public: {}", public_path.display());
    println!("  Public key (hex): {}", hex::encode(identity.public()));
    Ok(())
}

fn load_gcs_public(
    pubkey_file: Option<&Path>,
    pub_hex: Option<&str>,
) -> Result<Vec<u8>, BoxError> {
    if let Some(path) = pubkey_file {
        return Ok(identity::load_public_key(path)?);
    }
    if let Some(hex_str) = pub_hex {
        return Ok(hex::decode(hex_str.trim())?);
    }
    let default = Path::new("secrets").join(identity::PUBLIC_FILE);
    if default.exists() {
        return Ok(identity::load_public_key(&default)?);
    }
    Err("no GCS public key: use --peer-pubkey-file, --gcs-pub-hex, or secrets/gcs_signing.pub".into())
}

fn report(
    role: Role,
    suite: &Suite,
    counters: &CountersSnapshot,
    json_out: Option<&Path>,
    quiet: bool,
) -> Result<(), BoxError> {
    if !quiet {
        println!("{role} proxy stopped. Final counters:");
        if let serde_json::Value::Object(fields) = serde_json::to_value(counters)? {
            for (key, value) in fields {
                println!("  {key}: {value}");
            }
        }
    }
    if let Some(path) = json_out {
        let payload = serde_json::json!({
            "role": role.as_str(),
            "suite": suite.suite_id,
            "counters": counters,
            "ts_stop_ms": pqlink::control::now_ms(),
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&payload)?)?;
        if !quiet {
            println!("Wrote JSON report to {}", path.display());
        }
    }
    Ok(())
}

/// Read operator commands from stdin on a dedicated thread.
fn spawn_console() -> mpsc::UnboundedReceiver<ConsoleCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        eprintln!("Manual control ready. Type a suite ID, 'list', 'status', or 'quit'.");
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.to_ascii_lowercase().as_str() {
                "quit" | "exit" => {
                    let _ = tx.send(ConsoleCommand::Quit);
                    break;
                }
                "status" => {
                    let _ = tx.send(ConsoleCommand::Status);
                }
                "list" => {
                    eprintln!("Available suites:");
                    for suite in suites::list() {
                        eprintln!("  {}", suite.suite_id);
                    }
                }
                _ => {
                    let _ = tx.send(ConsoleCommand::Rekey(line.to_string()));
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(
        suite: Option<&str>,
        kem: Option<&str>,
        aead: Option<&str>,
        sig: Option<&str>,
    ) -> SuiteSelection {
        SuiteSelection {
            suite: suite.map(str::to_owned),
            kem: kem.map(str::to_owned),
            aead: aead.map(str::to_owned),
            sig: sig.map(str::to_owned),
        }
    }

    #[test]
    fn test_resolve_full_suite_id() {
        let suite = selection(Some("cs-mlkem768-aesgcm-mldsa65"), None, None, None)
            .resolve()
            .unwrap();
        assert_eq!(suite.suite_id, "cs-mlkem768-aesgcm-mldsa65");

        // legacy aliases resolve too
        let legacy = selection(Some("cs-kyber768-aesgcm-dilithium3"), None, None, None)
            .resolve()
            .unwrap();
        assert_eq!(legacy.suite_id, "cs-mlkem768-aesgcm-mldsa65");

        assert!(selection(Some("cs-rsa2048-aesgcm-mldsa65"), None, None, None)
            .resolve()
            .is_err());
    }

    #[test]
    fn test_resolve_from_components() {
        let suite = selection(None, Some("ML-KEM-1024"), Some("chacha20poly1305"), Some("ML-DSA-87"))
            .resolve()
            .unwrap();
        assert_eq!(suite.suite_id, "cs-mlkem1024-chacha20poly1305-mldsa87");

        let aliased = selection(None, Some("kyber768"), Some("AES-GCM"), Some("dilithium3"))
            .resolve()
            .unwrap();
        assert_eq!(aliased.suite_id, "cs-mlkem768-aesgcm-mldsa65");
    }

    #[test]
    fn test_resolve_rejects_suite_combined_with_components() {
        let err = selection(
            Some("cs-mlkem768-aesgcm-mldsa65"),
            Some("ML-KEM-768"),
            None,
            None,
        )
        .resolve()
        .unwrap_err();
        assert!(err.to_string().contains("--suite cannot be combined"));
    }

    #[test]
    fn test_resolve_rejects_missing_selection() {
        let err = selection(None, None, None, None).resolve().unwrap_err();
        assert!(err.to_string().contains("a suite is required"));
    }

    #[test]
    fn test_resolve_rejects_partial_components() {
        for (kem, aead, sig) in [
            (Some("ML-KEM-768"), None, None),
            (Some("ML-KEM-768"), Some("aesgcm"), None),
            (None, None, Some("ML-DSA-65")),
        ] {
            let err = selection(None, kem, aead, sig).resolve().unwrap_err();
            assert!(err.to_string().contains("provided together"), "{kem:?}/{aead:?}/{sig:?}");
        }
    }
}
