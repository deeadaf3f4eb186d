//! TMCMusic : client en ligne de commande pour un catalogue musical.
//!
//! Charge la configuration, installe les logs, ouvre la bibliothèque YAML
//! derrière un backend média simulé, puis lance le shell de commandes.

mod shell;

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tmcconfig::Config;
use tmccontrol::{Session, SessionOptions, SimulatedBackend};
use tmcsource::YamlCatalog;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::shell::Shell;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let options = resolve_options()?;

    let config = Config::load_config(options.config_dir.as_deref().unwrap_or(""))
        .context("Impossible de charger la configuration")?;
    init_tracing(&config);

    let library = match options.library {
        Some(path) => path,
        None => config.get_library_path()?,
    };
    info!(library = %library.display(), "Démarrage de TMCMusic");

    let catalog = YamlCatalog::open(&library)
        .with_context(|| format!("Impossible d'ouvrir la bibliothèque {}", library.display()))?;
    let track_seconds = config.get_simulated_track_seconds()?.max(1) as u64;
    let backend = SimulatedBackend::new(Duration::from_secs(track_seconds))?;

    let session_options = SessionOptions {
        station_fetch_length: config.get_station_fetch_length()?,
        volume: config.get_player_volume()?,
        shuffle: config.get_player_shuffle()?,
        repeat_one: config.get_player_repeat_one()?,
        state_file: config.get_state_path()?,
    };
    let session = Session::new(Arc::new(catalog), Arc::new(backend), session_options)?;

    println!("TMCMusic - bibliothèque {}", library.display());
    println!("Tape `help` pour la liste des commandes.");

    let shell = Shell::new(&session, &config);
    shell.auto_login();
    let outcome = shell.run(io::stdin().lock());

    if !session.shutdown(SHUTDOWN_TIMEOUT) {
        warn!("Some background tasks did not finish before exit");
    }
    outcome?;

    println!("Au revoir !");
    Ok(())
}

struct AppOptions {
    config_dir: Option<String>,
    library: Option<PathBuf>,
}

fn resolve_options() -> Result<AppOptions> {
    let mut args = env::args().skip(1);
    let mut options = AppOptions {
        config_dir: None,
        library: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--config-dir requiert une valeur"))?;
                options.config_dir = Some(value);
            }
            "--library" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--library requiert une valeur"))?;
                options.library = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => bail!("Argument inconnu: {other}. Utilise --help pour l'aide."),
        }
    }
    Ok(options)
}

fn print_usage() {
    println!("Usage: tmcmusic [--config-dir <dir>] [--library <file.yaml>]");
    println!("Variables d'environnement:");
    println!("  TMC_CONFIG              Répertoire de configuration (par défaut ./.tmcmusic ou ~/.tmcmusic)");
    println!("  TMC_CONFIG__A__B=value  Surcharge la clé de configuration a.b");
    println!("  RUST_LOG                Filtre tracing (ex: tmccontrol=debug), prioritaire sur logger.min_level");
}

fn init_tracing(config: &Config) {
    let _ = tracing_log::LogTracer::init();

    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_path = config.get_log_path().ok().flatten();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(log_writer(log_path))
        .try_init();
}

fn log_writer(path: Option<PathBuf>) -> BoxMakeWriter {
    if let Some(path) = path {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let shared = SharedLogWriter::new(file);
                return BoxMakeWriter::new(move || shared.clone());
            }
            Err(err) => {
                eprintln!(
                    "Impossible d'ouvrir {} pour les logs: {err}. Retour à stderr",
                    path.display()
                );
            }
        }
    }
    BoxMakeWriter::new(io::stderr)
}

#[derive(Clone)]
struct SharedLogWriter {
    inner: Arc<Mutex<File>>,
}

impl SharedLogWriter {
    fn new(file: File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| io::Error::other(err.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| io::Error::other(err.to_string()))?;
        guard.flush()
    }
}
