use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nalgebra::Vector3;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use uwb_positioning::algorithms::{solve_3d, solve_known_height, AnchorCalibrator};
use uwb_positioning::api::{CycleStatus, Tracker};
use uwb_positioning::core::NodeId;
use uwb_positioning::hardware::{LineTransport, SerialTransceiver};
use uwb_positioning::protocol::UwbController;
use uwb_positioning::utils::ConfigurationManager;

#[derive(Parser, Debug)]
#[command(name = "uwb-positioning", version, about = "UWB anchor/tag positioning host")]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    /// Serial device, overrides the config file
    #[arg(long)]
    port: Option<String>,
    /// Baud rate, overrides the config file
    #[arg(long)]
    baud: Option<u32>,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Range all enabled tags against the enabled anchors in a loop
    Track {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Health-check nodes (decimal or 0x-prefixed hex ids)
    Ping {
        #[arg(required = true, value_parser = parse_node_id)]
        ids: Vec<u16>,
    },
    /// Recover the anchors' planar layout from anchor-to-anchor ranges
    Calibrate {
        /// Write the recovered positions back to the config file
        #[arg(long)]
        save: bool,
    },
    /// Solve one position offline
    Solve {
        /// Anchor position as x,y,z (repeat per anchor)
        #[arg(long = "anchor", value_parser = parse_point, required = true)]
        anchors: Vec<[f64; 3]>,
        /// Measured distances in anchor order
        #[arg(long, value_delimiter = ',', required = true)]
        distances: Vec<f64>,
        /// Known tag height; omit for a full 3D solve
        #[arg(long)]
        height: Option<f64>,
    },
}

fn parse_node_id(text: &str) -> Result<u16, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid node id '{}': {}", text, e))
}

fn parse_point(text: &str) -> Result<[f64; 3], String> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid point '{}': {}", text, e))?;
    match values.as_slice() {
        &[x, y, z] => Ok([x, y, z]),
        _ => Err(format!("expected x,y,z but got '{}'", text)),
    }
}

fn load_config(path: &Path) -> Result<ConfigurationManager> {
    if path.exists() {
        ConfigurationManager::from_file(path).with_context(|| format!("failed to load {}", path.display()))
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(ConfigurationManager::new())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if let Command::Solve {
        anchors,
        distances,
        height,
    } = &args.command
    {
        return solve_offline(anchors, distances, *height);
    }

    let mut manager = load_config(&args.config)?;
    if let Some(port) = &args.port {
        manager.config_mut().serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        manager.config_mut().serial.baud_rate = baud;
    }

    let serial = manager.config().serial.clone();
    let port = serial.port.clone();
    let transceiver = SerialTransceiver::connect(serial).with_context(|| format!("failed to open {}", port))?;
    let controller = UwbController::new(&transceiver).with_timeout(manager.response_timeout());

    match args.command {
        Command::Track { cycles } => track(&manager, &controller, &transceiver, cycles),
        Command::Ping { ids } => {
            let tracker = Tracker::new(manager.stale_after());
            for (id, response) in tracker.ping_nodes(&controller, &ids)? {
                match response {
                    Some(ping) => println!(
                        "{}  state=0x{:08X}  voltage={}mV",
                        NodeId(id),
                        ping.system_state,
                        ping.voltage_mv
                    ),
                    None => println!("{}  no response", NodeId(id)),
                }
            }
            Ok(())
        }
        Command::Calibrate { save } => {
            let mut anchors = manager.anchor_registry()?;
            let calibrator = AnchorCalibrator::new(manager.config().calibration.attempts);
            let report = calibrator.calibrate(&controller, &mut anchors)?;
            for (id, x, y) in &report.layout {
                println!("{}  x={:.3}  y={:.3}", NodeId(*id), x, y);
            }
            if save {
                let tags = manager.tag_registry()?;
                manager.store_registries(&anchors, &tags);
                manager
                    .save_to_file(&args.config)
                    .with_context(|| format!("failed to save {}", args.config.display()))?;
            }
            Ok(())
        }
        Command::Solve { .. } => Ok(()),
    }
}

fn track(
    manager: &ConfigurationManager,
    controller: &UwbController<'_, SerialTransceiver>,
    transceiver: &SerialTransceiver,
    cycles: Option<u64>,
) -> Result<()> {
    let anchors = manager.anchor_registry()?;
    let mut tags = manager.tag_registry()?;
    let tracker = Tracker::new(manager.stale_after());
    let interval = manager.update_interval();

    info!(
        anchors = anchors.active_ids().len(),
        tags = tags.active_tags().len(),
        "tracking started"
    );

    let mut completed = 0u64;
    while cycles.map_or(true, |limit| completed < limit) {
        let started = Instant::now();
        let report = tracker.update_cycle(controller, &anchors, &mut tags);

        match report.status {
            CycleStatus::Completed => {}
            CycleStatus::InsufficientAnchors { enabled } => {
                warn!(enabled, "at least 3 enabled anchors are needed")
            }
            CycleStatus::ConnectionLost => {
                if !transceiver.is_connected() {
                    bail!("serial link lost");
                }
            }
        }

        for row in &report.monitor {
            debug!("{}", row);
        }
        for snapshot in &report.snapshots {
            match snapshot.filtered {
                Some([x, y, z]) if snapshot.visible => {
                    info!(tag = %NodeId(snapshot.tag_id), x, y, z, "position")
                }
                _ => info!(tag = %NodeId(snapshot.tag_id), "hidden"),
            }
        }

        completed += 1;
        thread::sleep(interval.saturating_sub(started.elapsed()));
    }
    Ok(())
}

fn solve_offline(anchors: &[[f64; 3]], distances: &[f64], height: Option<f64>) -> Result<()> {
    let anchors: Vec<Vector3<f64>> = anchors.iter().map(|&p| Vector3::from(p)).collect();
    let position = match height {
        Some(z) => solve_known_height(&anchors, distances, z)?,
        None => solve_3d(&anchors, distances)?,
    };
    println!("x={:.4}  y={:.4}  z={:.4}", position.x, position.y, position.z);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_id() {
        assert_eq!(parse_node_id("65280"), Ok(0xFF00));
        assert_eq!(parse_node_id("0xff01"), Ok(0xFF01));
        assert_eq!(parse_node_id("0XFF02"), Ok(0xFF02));
        assert!(parse_node_id("0x1FFFF").is_err());
        assert!(parse_node_id("tag").is_err());
    }

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("0, -0.35,2.23"), Ok([0.0, -0.35, 2.23]));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("1,2,x").is_err());
    }

    #[test]
    fn test_cli_parses_solve() {
        let args = Args::try_parse_from([
            "uwb-positioning",
            "solve",
            "--anchor",
            "0,0,0",
            "--anchor",
            "1,0,0",
            "--anchor",
            "0,1,0",
            "--distances",
            "1,1,1",
            "--height",
            "0.5",
        ])
        .unwrap();
        match args.command {
            Command::Solve {
                anchors,
                distances,
                height,
            } => {
                assert_eq!(anchors.len(), 3);
                assert_eq!(distances, vec![1.0, 1.0, 1.0]);
                assert_eq!(height, Some(0.5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
