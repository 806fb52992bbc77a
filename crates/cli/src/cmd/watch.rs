//! Watch a directory tree and print its changes

use anyhow::{Context, Result};
use famwatch::{ChangeEvent, Monitor};
use famwatch_cli::output::{EventPrinter, OutputFormat};
use famwatch_cli::settings;
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// How often the loop checks whether the monitor gave up on its own
const QUIT_CHECK: Duration = Duration::from_millis(250);

pub struct WatchArgs {
    pub path: PathBuf,
    pub name: String,
    pub config: Option<PathBuf>,
    pub duration: Option<u64>,
    pub json: bool,
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let config = settings::load(args.config.as_deref())?;
    let format = if args.json { OutputFormat::Json } else { OutputFormat::Text };
    let printer = EventPrinter::new(format, !args.json && std::io::stdout().is_terminal());

    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    let path = args.path.clone();
    let name = args.name.clone();

    // Startup blocks until the initial scan is done
    let monitor = tokio::task::spawn_blocking(move || {
        Monitor::start_with_config(&path, &name, config, move |event: ChangeEvent| {
            let _ = tx.send(event);
        })
    })
    .await
    .context("Monitor startup task failed")?
    .with_context(|| format!("Failed to watch {}", args.path.display()))?;

    if !args.json {
        announce(monitor.root());
    }
    info!("Watching {}", monitor.root().display());

    let quit = monitor.quit_handle();
    let deadline = args.duration.map(Duration::from_secs);
    let stop_after = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(stop_after);

    let mut quit_check = tokio::time::interval(QUIT_CHECK);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                println!("{}", printer.line(&event, chrono::Local::now()));
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            _ = &mut stop_after => {
                debug!("Watch duration elapsed");
                break;
            }
            _ = quit_check.tick() => {
                if quit.is_quitting() {
                    break;
                }
            }
        }
    }

    let failure = monitor.take_error();
    tokio::task::spawn_blocking(move || monitor.stop())
        .await
        .context("Monitor shutdown task failed")?;

    // Drain what arrived before the stop completed
    while let Ok(event) = rx.try_recv() {
        println!("{}", printer.line(&event, chrono::Local::now()));
    }

    match failure {
        Some(e) => Err(e).context("Monitor stopped unexpectedly"),
        None => Ok(()),
    }
}

fn announce(root: &Path) {
    println!(
        "{} {} {}",
        "Watching".bold(),
        root.display().cyan(),
        "(Ctrl-C to stop)".dimmed()
    );
}
