mod logging;
mod render;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tq_client::config::{env_true, resolve_optional};
use tq_client::{ClientConfig, ConnectionStatus, HttpReportDirectory, Session};
use tq_core::status::BatchStatus;
use tracing::{info, warn};

const CONNECT_WAIT: Duration = Duration::from_secs(10);
const SUMMARY_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "tq-monitor")]
#[command(about = "Drive and follow batch processing on the worker hub", long_about = None)]
struct Args {
    #[arg(long, default_value = "", global = true)]
    addr: String,
    #[arg(long, default_value = "", global = true)]
    api_base: String,
    #[arg(long, default_value = "", global = true)]
    user: String,
    #[arg(long, default_value = "", global = true)]
    log_dir: String,
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print progress until the batch finishes or Ctrl-C
    Watch {
        #[arg(long, default_value = "")]
        batch: String,
    },
    /// Ask the workers to process a batch
    Start {
        #[arg(long)]
        batch: String,
        #[arg(long, value_delimiter = ',', required = true)]
        reports: Vec<String>,
        #[arg(long, default_value_t = 1.0)]
        tabs: f64,
        #[arg(long, default_value_t = false)]
        follow: bool,
    },
    Pause {
        #[arg(long)]
        batch: String,
    },
    Resume {
        #[arg(long)]
        batch: String,
    },
    Stop {
        #[arg(long)]
        batch: String,
    },
    /// List submission summaries for every batch
    Batches {
        /// Also list the records of this batch
        #[arg(long, default_value = "")]
        expand: String,
    },
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone)]
struct Config {
    client: ClientConfig,
    debug: bool,
    log_dir: String,
}

fn load_config(args: &Args) -> Config {
    Config {
        client: ClientConfig::resolve(&args.addr, &args.api_base, &args.user),
        debug: args.debug || env_true("TQ_DEBUG"),
        log_dir: resolve_optional(&args.log_dir, "TQ_LOG_DIR").unwrap_or_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args);
    let _log_guard = logging::init_logging(config.debug, &config.log_dir);

    let directory = HttpReportDirectory::new(&config.client.api_base, config.client.request_timeout)
        .context("Failed to build report directory client")?;
    let session = Session::from_config(config.client.clone(), Arc::new(directory))?;

    match args.command {
        Command::Batches { expand } => list_batches(&session, expand.trim()).await,
        Command::Watch { batch } => {
            connect(&session, &batch).await?;
            follow(&session).await
        }
        Command::Start {
            batch,
            reports,
            tabs,
            follow: keep_following,
        } => {
            connect(&session, &batch).await?;
            let num_tabs = session.start_batch(&batch, &reports, tabs)?;
            println!(
                "Requested batch {} with {} reports on {num_tabs} workers",
                render::short_id(&batch),
                reports.len()
            );
            if keep_following {
                follow(&session).await
            } else {
                session.transport().disconnect().await;
                Ok(())
            }
        }
        Command::Pause { batch } => control(&session, &batch, Control::Pause).await,
        Command::Resume { batch } => control(&session, &batch, Control::Resume).await,
        Command::Stop { batch } => control(&session, &batch, Control::Stop).await,
    }
}

/// Dials the hub and waits for the greeting to go out. An empty `batch_id`
/// connects without joining a batch room.
async fn connect(session: &Session, batch_id: &str) -> Result<()> {
    let transport = session.transport();
    if let Some(user_id) = &transport.config().user_id {
        transport.identify(user_id);
    }
    if !batch_id.trim().is_empty() {
        transport.join_batch(batch_id.trim());
    }
    let mut connection = transport.connection().subscribe();
    transport.connect()?;
    let connected = async {
        while !transport.is_connected() {
            match connection.recv().await {
                Some(ConnectionStatus::Connected) | None => break,
                Some(ConnectionStatus::Disconnected) => {}
            }
        }
    };
    if tokio::time::timeout(CONNECT_WAIT, connected).await.is_err() || !transport.is_connected() {
        transport.disconnect().await;
        bail!(
            "Could not reach the worker hub at {}",
            transport.config().socket_addr
        );
    }
    Ok(())
}

async fn control(session: &Session, batch_id: &str, control: Control) -> Result<()> {
    connect(session, batch_id).await?;
    let gateway = session.gateway();
    match control {
        Control::Pause => gateway.pause(batch_id)?,
        Control::Resume => gateway.resume(batch_id)?,
        Control::Stop => gateway.stop(batch_id)?,
    }
    info!(event = "control_sent", batch_id, control = ?control);
    session.transport().disconnect().await;
    Ok(())
}

/// Prints one block of lines per state change until a terminal status or
/// Ctrl-C, then shows the refreshed summaries after a completion.
async fn follow(session: &Session) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut states = session.store().subscribe();
    let mut summaries = session.coordinator().summaries();
    let mut pauses = session.transport().pauses().subscribe();
    let mut connection = session.transport().connection().subscribe();

    let initial = states.borrow_and_update().clone();
    if initial.status != BatchStatus::Idle {
        print_lines(render::progress_lines(&initial));
    }

    let printer = async {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut finished = None;
        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!(event = "monitor_interrupted");
                    break;
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    print_lines(render::progress_lines(&state));
                    if state.status.is_terminal() {
                        finished = Some(state.status);
                        break;
                    }
                }
                Some(signal) = pauses.recv() => {
                    println!("{}", render::pause_line(&signal));
                }
                Some(status) = connection.recv() => match status {
                    ConnectionStatus::Connected => println!("Connected"),
                    ConnectionStatus::Disconnected => {
                        warn!(event = "monitor_link_lost");
                        println!("Connection lost, reconnecting...");
                    }
                },
            }
        }
        let _ = shutdown_tx.send(true);
        finished
    };

    let ((), finished) = tokio::join!(session.run(shutdown_rx), printer);

    if finished == Some(BatchStatus::Completed) {
        match tokio::time::timeout(SUMMARY_WAIT, summaries.changed()).await {
            Ok(Ok(())) => {
                let batches = summaries.borrow_and_update().clone();
                print_lines(render::batch_lines(&batches));
            }
            _ => warn!(event = "monitor_summary_timeout"),
        }
    }
    session.transport().disconnect().await;
    Ok(())
}

async fn list_batches(session: &Session, expand: &str) -> Result<()> {
    if !expand.is_empty() {
        session.details().toggle(expand);
    }
    let batches = session.coordinator().refresh_summaries().await?;
    if batches.is_empty() {
        print_lines(render::batch_lines(&batches));
        return Ok(());
    }
    let expanded = session.details().expanded();
    for stats in batches.iter() {
        println!("{}", render::batch_line(stats));
        if expanded.as_deref() == Some(stats.id.as_str()) {
            let reports = session.batch_detail(&stats.id).await?;
            print_lines(render::report_lines(&reports));
        }
    }
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_parses_report_list_and_tabs() {
        let args = Args::try_parse_from([
            "tq-monitor",
            "start",
            "--batch",
            "B1",
            "--reports",
            "r1,r2,r3",
            "--tabs",
            "4",
            "--follow",
            "--addr",
            "127.0.0.1:5000",
        ])
        .expect("parse start");
        assert_eq!(args.addr, "127.0.0.1:5000");
        match args.command {
            Command::Start {
                batch,
                reports,
                tabs,
                follow,
            } => {
                assert_eq!(batch, "B1");
                assert_eq!(reports, vec!["r1", "r2", "r3"]);
                assert_eq!(tabs, 4.0);
                assert!(follow);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn start_requires_reports() {
        assert!(Args::try_parse_from(["tq-monitor", "start", "--batch", "B1"]).is_err());
    }

    #[test]
    fn batches_takes_optional_expand() {
        let args = Args::try_parse_from(["tq-monitor", "batches", "--expand", "B4"])
            .expect("parse batches");
        assert!(matches!(args.command, Command::Batches { ref expand } if expand == "B4"));
        let args = Args::try_parse_from(["tq-monitor", "batches"]).expect("parse batches");
        assert!(matches!(args.command, Command::Batches { ref expand } if expand.is_empty()));
    }

    #[test]
    fn flags_feed_client_config() {
        let args = Args::try_parse_from([
            "tq-monitor",
            "--debug",
            "--user",
            "u-3",
            "--api-base",
            "http://10.0.0.2:3000",
            "pause",
            "--batch",
            "B7",
        ])
        .expect("parse pause");
        let config = load_config(&args);
        assert!(config.debug);
        assert_eq!(config.client.user_id.as_deref(), Some("u-3"));
        assert_eq!(config.client.api_base, "http://10.0.0.2:3000");
        assert!(matches!(args.command, Command::Pause { ref batch } if batch == "B7"));
    }
}
