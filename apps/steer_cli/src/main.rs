use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{ClientEvent, LiveClient, SessionTask};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod ui;

use commands::{Command, HELP};
use config::{load_settings, Args, Settings};
use ui::{render, TerminalSurface};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;
    let client = LiveClient::new(
        settings.client_config()?,
        settings.initial_parameters()?,
        Arc::new(TerminalSurface),
    )?;
    info!(server_url = %settings.server_url, "steer: ready");

    let printer = spawn_printer(client.subscribe_events());
    let poller = client.spawn_queue_poller()?;
    println!("{HELP}");

    let mut current: Option<SessionTask> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => execute(&client, &settings, command, &mut current).await,
            Err(message) => println!("{message}"),
        }
    }

    // Leaving the prompt is navigation away: end the session before exiting.
    client.stop().await;
    if let Some(task) = current.take() {
        let outcome = task.outcome().await;
        debug!(?outcome, "steer: last session resolved");
    }
    poller.abort();
    let _ = poller.await;
    drop(client);
    let _ = printer.await;
    Ok(())
}

async fn execute(
    client: &LiveClient,
    settings: &Settings,
    command: Command,
    current: &mut Option<SessionTask>,
) {
    match command {
        Command::Start => match client.start() {
            Ok(task) => *current = Some(task),
            Err(err) => println!("[error] {err}"),
        },
        Command::Stop => client.stop().await,
        Command::Edit(edit) => match client.edit(edit) {
            Ok(params) => debug!(parameters = %params.describe(), "steer: parameters changed"),
            Err(err) => println!("[error] {err}"),
        },
        Command::Snapshot => match client.snapshot(&settings.snapshot_dir).await {
            Ok(saved) => println!("saved {}", saved.image_path.display()),
            Err(err) => println!("[error] snapshot failed: {err}"),
        },
        Command::Status => {
            let state = client.state();
            let controls = state.controls();
            println!("state: {state}");
            println!("{}", client.parameters().snapshot().describe());
            println!(
                "available: start={} stop={} snapshot={}",
                controls.start, controls.stop, controls.snapshot
            );
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn spawn_printer(mut events: broadcast::Receiver<ClientEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", render(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "steer: event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
