use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use colored::*;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};
use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;
use tokio::runtime;
use tokio::sync::watch;

use bgpd_recorder::cli::{self, Args, Command, RunOptions};
use bgpd_recorder::config::{self, ServerConfig};
use bgpd_recorder::session::{Poller, SessionManager};

fn main() {
    let args = Args::parse();

    let (bgpd_level, other_level) = match args.verbose {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("bgpd"), bgpd_level)
        .filter(Some("bgpd_recorder"), bgpd_level)
        .filter(None, other_level)
        .init();

    let result: Result<(), Box<dyn Error>> = match &args.cmd {
        Command::Run(options) => {
            info!("Logging at levels {}/{}", bgpd_level, other_level);
            run(options)
        }
        Command::Decode(options) => cli::decode(options)
            .map_err(|err| format!("error decoding '{}': {}", options.path.display(), err).into()),
    };
    if let Err(err) = result {
        eprintln!("{}", err.to_string().red());
        process::exit(1);
    }
}

fn run(options: &RunOptions) -> Result<(), Box<dyn Error>> {
    let config = config::from_file(&options.config_path)
        .map_err(|err| format!("{}: {}", options.config_path.display(), err))?;
    debug!(
        "Found {} peers in {}",
        config.peers.len(),
        options.config_path.display()
    );
    let config = Arc::new(config);
    let (config_tx, config_rx) = watch::channel(Arc::clone(&config));
    watch_reload(options.config_path.clone(), config_tx)?;

    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let poller = Poller::bind(&config.listen).await?;
        SessionManager::new(config, poller, config_rx).run().await;
        Ok::<(), io::Error>(())
    })?;
    Ok(())
}

/// Reload the config file on SIGHUP, keeping the running config when the new one is invalid
fn watch_reload(
    path: PathBuf,
    config_tx: watch::Sender<Arc<ServerConfig>>,
) -> Result<(), Box<dyn Error>> {
    let mut signals = Signals::new(&[SIGHUP])?;
    thread::Builder::new()
        .name("config-reload".into())
        .spawn(move || {
            for _ in signals.forever() {
                info!("Reloading {}", path.display());
                match config::from_file(&path) {
                    Ok(config) => {
                        if config_tx.send(Arc::new(config)).is_err() {
                            break;
                        }
                    }
                    Err(err) => error!("Keeping running config, {}: {}", path.display(), err),
                }
            }
        })?;
    Ok(())
}
