use std::{net::IpAddr, path::PathBuf, process::ExitCode};

use batchsend::{Config, SyncEvent, SyncService, TransferBatch, TransferEvent};
use clap::{Parser, Subcommand};
use log::error;

#[derive(Parser)]
#[command(name = "batchsend", version, about = "Send a batch of files to a device on the local network")]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive batches until interrupted
    Host {
        #[arg(long)]
        bind: Option<IpAddr>,
        #[arg(long)]
        port: Option<u16>,
        /// Directory received files are written to
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Leave files that already exist untouched
        #[arg(long)]
        skip_existing: bool,
    },
    /// Send one batch and exit
    Send {
        addr: IpAddr,
        #[arg(long)]
        port: Option<u16>,
        /// Send every regular file in this directory
        #[arg(long, conflicts_with = "files")]
        dir: Option<PathBuf>,
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> batchsend::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::new()?,
    };

    match cli.command {
        Command::Host {
            bind,
            port,
            dir,
            skip_existing,
        } => {
            if let Some(dir) = dir {
                config.download_dir = dir;
            }
            config.skip_existing |= skip_existing;
            let bind = bind.unwrap_or(config.bind_addr);
            let port = port.unwrap_or(config.port);

            let service = SyncService::new(config);
            let Some(mut events) = service.subscribe() else {
                return Ok(ExitCode::FAILURE);
            };
            service.start_host(bind, port).await?;

            loop {
                tokio::select! {
                    Some(event) = events.recv() => print_event(&event, cli.json),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            service.stop_host().await;
            while let Ok(event) = events.try_recv() {
                print_event(&event, cli.json);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Send {
            addr,
            port,
            dir,
            files,
        } => {
            let batch = match dir {
                Some(dir) => TransferBatch::from_dir(dir).await?,
                None => TransferBatch::from_paths(files).await?,
            };
            let port = port.unwrap_or(config.port);

            let service = SyncService::new(config);
            let Some(mut events) = service.subscribe() else {
                return Ok(ExitCode::FAILURE);
            };
            service.start_client(addr, port, batch).await?;

            while let Some(event) = events.recv().await {
                print_event(&event, cli.json);
                match event.event {
                    TransferEvent::Completed { .. } => return Ok(ExitCode::SUCCESS),
                    TransferEvent::Failed { .. } => return Ok(ExitCode::FAILURE),
                    _ => {}
                }
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_event(event: &SyncEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("could not encode event: {e}"),
        }
        return;
    }

    let role = event.role;
    match &event.event {
        TransferEvent::Progress { done, total } => println!("[{role}] {done} of {total} files"),
        TransferEvent::FileTransferred { name } => println!("[{role}] transferred {name}"),
        TransferEvent::FileSkipped { name } => println!("[{role}] skipped {name} (already exists)"),
        TransferEvent::Completed { count } => println!("[{role}] completed: {count} files"),
        TransferEvent::Failed {
            kind,
            message,
            files_done,
        } => println!("[{role}] failed ({kind:?}) after {files_done} files: {message}"),
    }
}
