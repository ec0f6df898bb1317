//! # lean-homie CLI
//!
//! Offline utilities for topic derivation, value checks and layout dry-runs.

use anyhow::{Context, Result};
use lean_homie_core::value::normalize;
use lean_homie_core::{DataType, Device, DeviceLayout, MemoryTransport, StaticLink};
use lean_homie_proto::{DeviceTopic, DEFAULT_ROOT};
use std::env;
use std::sync::Arc;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "topics" => {
            if args.len() < 5 {
                eprintln!("Usage: lean-homie topics <device> <node> <property> [root]");
                std::process::exit(1);
            }
            let root = args.get(5).map_or(DEFAULT_ROOT, String::as_str);
            let property = DeviceTopic::new(root, &args[2])
                .node(&args[3])
                .property(&args[4]);
            println!("{property}");
            println!("{}", property.command());
        }
        "validate" => {
            if args.len() < 4 {
                eprintln!("Usage: lean-homie validate <datatype> <value> [format]");
                std::process::exit(1);
            }
            let datatype = DataType::from_name(&args[2])
                .with_context(|| format!("Unknown datatype '{}'", args[2]))?;
            let normalized = normalize(datatype, args.get(4).map(String::as_str), &args[3]);
            if normalized.defaulted {
                println!("invalid, stored as \"{}\"", normalized.value);
                std::process::exit(2);
            }
            println!("valid, stored as \"{}\"", normalized.value);
        }
        "describe" => {
            if args.len() < 5 {
                eprintln!("Usage: lean-homie describe <layout.json> <device-id> <device-name>");
                std::process::exit(1);
            }
            describe(&args[2], &args[3], &args[4])?;
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Print every publish a device makes on its first connection.
fn describe(path: &str, device_id: &str, device_name: &str) -> Result<()> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    let layout = DeviceLayout::from_json(&json).context("Failed to parse layout")?;

    let transport = Arc::new(MemoryTransport::new());
    let link = Arc::new(StaticLink::new("00:00:00:00:00:00", None));
    let mut device = Device::new(DEFAULT_ROOT, device_id, transport.clone(), link);
    device.set_name(device_name);
    layout.apply(&mut device).context("Failed to apply layout")?;

    let setup = device.setup();
    if setup.is_ok() {
        device.reconcile(Vec::new());
    }

    for publication in transport.published() {
        println!("{} {}", publication.topic, publication.payload);
    }
    for subscription in transport.subscriptions() {
        println!("# subscribed {subscription}");
    }

    setup.context("Device setup failed")?;
    Ok(())
}

fn print_help() {
    println!(
        r#"lean-homie CLI

USAGE:
    lean-homie <COMMAND> [OPTIONS]

COMMANDS:
    topics <device> <node> <property> [root]     Print a property's value and command topics
    validate <datatype> <value> [format]         Check a payload against a datatype
    describe <layout.json> <device-id> <name>    Dry-run the first-connection announcements
    help                                         Show this help message

EXAMPLES:
    lean-homie topics d1 n1 p1
    lean-homie validate color 12.6,0,255 rgb
    lean-homie describe layout.json car "My Car"
"#
    );
}
