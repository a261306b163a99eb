//! `etho` – runs the control core against simulated robots.
//!
//! 1. Loads the configuration (first argument, or `~/.etho/config.toml`).
//! 2. Starts the fusion hub with one inbox per configured tracker, and the
//!    track store when `track_db` is set.
//! 3. Reads JSON lines from stdin: tracker frames go to the hub, commands to
//!    the control loop.
//! 4. Prints status events as they are published.
//! 5. On **Ctrl-C** every robot is put to idle and stopped before exit.

mod config;
mod input;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use etho_hal::SimRobotLink;
use etho_memory::TrackStore;
use etho_middleware::{EventBus, Notifier, Topic, TopicReceiver};
use etho_navigation::SpatialMap;
use etho_perception::{FusionHub, SensorFusionEngine, SnapshotSink, SourceHandle};
use etho_runtime::{ControlLoop, LoopCommand, RobotControlStack, TelemetryConfig, init_tracing};
use etho_types::{EthoError, Event, EventPayload};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::input::InputLine;

fn main() {
    print_banner();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            println!("  No config at {}, using defaults.", path.display().to_string().dimmed());
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };

    let _guard = init_tracing("etho", &TelemetryConfig::from_env());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(run(cfg));
    // stdin is read on a blocking thread that never returns on its own.
    runtime.shutdown_timeout(Duration::from_millis(200));

    if let Err(e) = result {
        error!(error = %e, "etho stopped with an error");
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<(), EthoError> {
    let bus = EventBus::default();

    let map = cfg
        .map
        .as_ref()
        .map(SpatialMap::from_settings)
        .transpose()?
        .map(Arc::new);

    let sink: Option<Box<dyn SnapshotSink>> = match &cfg.track_db {
        Some(path) => {
            info!(path = %path.display(), "recording complete frames");
            Some(Box::new(TrackStore::open(path)?))
        }
        None => None,
    };
    let (mut hub, fused) = FusionHub::spawn(SensorFusionEngine::new(cfg.fusion.clone()), sink, cfg.hub.clone());
    let sources: HashMap<String, SourceHandle> = cfg
        .sources
        .iter()
        .map(|s| {
            let handle = hub.register_source(s.id.clone(), s.kinds.iter().copied(), s.required);
            (s.id.clone(), handle)
        })
        .collect();
    if let Some(primary) = hub.primary() {
        info!(%primary, sources = sources.len(), "fusion hub ready");
    }

    let robot_settings = cfg.robot_settings();
    let mut stacks = Vec::with_capacity(cfg.robots.len());
    for robot in &cfg.robots {
        info!(robot = %robot.id, connection = %robot.connection, "using a simulated link");
        let (link, _probe) = SimRobotLink::boxed(robot.id.clone());
        stacks.push(RobotControlStack::new(link, &robot_settings, map.clone(), bus.clone())?);
    }
    let mut control_loop =
        ControlLoop::new(cfg.control.clone(), stacks).with_notifier(Notifier::new(bus.clone(), "control_loop"));

    let (command_tx, command_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let ctrlc_tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping all robots …".yellow().bold());
        ctrlc_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; robots will not be stopped on Ctrl-C");
    }

    let printer = tokio::spawn(print_events(
        bus.subscribe_to(Topic::ControlStatus),
        bus.subscribe_to(Topic::Safety),
        shutdown_rx.clone(),
    ));
    let reader = tokio::spawn(read_stdin(sources, command_tx));

    println!();
    println!(
        "  Driving {} robot(s) at {:.1} Hz. Feed JSON lines on stdin, {} to stop.\n",
        cfg.robots.len(),
        control_loop.settings().effective_frequency_hz(),
        "Ctrl-C".bold().cyan()
    );

    control_loop.run(fused, command_rx, shutdown_rx).await;

    reader.abort();
    hub.shutdown().await;
    if let Err(e) = printer.await {
        warn!(error = %e, "status printer ended abnormally");
    }

    for status in control_loop.statuses() {
        println!(
            "  {} {} at ({:.3}, {:.3})",
            status.id.bold(),
            status.control_mode.to_string().dimmed(),
            status.state.position.x,
            status.state.position.y
        );
    }
    println!("{}", "  ✓ All robots idle. Exiting etho.".green());
    Ok(())
}

async fn read_stdin(sources: HashMap<String, SourceHandle>, commands: mpsc::Sender<LoopCommand>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed; the loop keeps running until Ctrl-C");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                return;
            }
        };
        line_no += 1;
        match input::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(InputLine::Command(command))) => {
                if commands.send(command).await.is_err() {
                    return;
                }
            }
            Ok(Some(InputLine::Detection(detection))) => match sources.get(&detection.source) {
                Some(handle) => handle.submit(detection.snapshot),
                None => warn!(line = line_no, source = %detection.source, "frame from unknown source"),
            },
            Err(e) => warn!(line = line_no, error = %e, "unreadable input line"),
        }
    }
}

async fn print_events(mut status: TopicReceiver, mut safety: TopicReceiver, mut shutdown: watch::Receiver<bool>) {
    loop {
        let received = tokio::select! {
            r = status.recv() => r,
            r = safety.recv() => r,
            _ = shutdown.changed() => return,
        };
        match received {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "status printer fell behind");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// One-line rendering of the events worth showing an operator.
fn describe(event: &Event) -> Option<String> {
    let who = format!("[{}]", event.source).cyan();
    let what = match &event.payload {
        EventPayload::ControlModeChanged(mode) => format!("control mode {}", mode.to_string().bold()),
        EventPayload::ControllerChanged(controller) => format!("experiment controller {}", controller.to_string().bold()),
        EventPayload::ControllerStatus(s) if !s.is_empty() => format!("controller: {s}"),
        EventPayload::SelectedRobotChanged(robot) => format!("selected {}", robot.bold()),
        EventPayload::SafetyStop { reason } => format!("{} {reason}", "safety stop:".red().bold()),
        EventPayload::ObstacleDetectedChanged(true) => "obstacle detected".yellow().to_string(),
        EventPayload::ObstacleDetectedChanged(false) => "obstacle cleared".to_string(),
        EventPayload::ConnectionStatusChanged(status) => format!("connection {status:?}").to_lowercase(),
        _ => return None,
    };
    Some(format!("  {who} {what}"))
}

fn print_banner() {
    println!();
    println!("{}", r#"   ______  __          "#.bold().cyan());
    println!("{}", r#"  / __/ /_/ /  ___     "#.bold().cyan());
    println!("{}", r#" / _// __/ _ \/ _ \    "#.bold().cyan());
    println!("{}", r#"/___/\__/_//_/\___/    "#.bold().cyan());
    println!();
    println!("  {} {}", "Etho".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Multi-robot behavioral experiment control");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_types::ControlModeType;

    #[test]
    fn describes_operator_events_only() {
        let line = describe(&Event::new("robot_1", EventPayload::ControlModeChanged(ControlModeType::Manual)));
        assert!(line.is_some_and(|l| l.contains("robot_1") && l.contains("manual")));

        let stop = describe(&Event::new(
            "robot_1",
            EventPayload::SafetyStop {
                reason: "power down".into(),
            },
        ));
        assert!(stop.is_some_and(|l| l.contains("power down")));

        assert!(describe(&Event::new("robot_1", EventPayload::InManualMode)).is_none());
        assert!(describe(&Event::new("robot_1", EventPayload::ControllerStatus(String::new()))).is_none());
    }
}
