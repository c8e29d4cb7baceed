//! OCPP networking node demo CLI
//!
//! Runs a charging station, a hub and a central system in one process,
//! connected by in-memory links, and routes requests between them.
//!
//! # Usage
//!
//! ```bash
//! # Heartbeats from CS001 to CSMS through HUB1
//! ocpp-nn-node --name CS001 --requests 5
//!
//! # Static routes from a file, hybrid framing
//! ocpp-nn-node --name CS001 --routes routes.json --format hybrid
//! ```
//!
//! # Topology
//!
//! ```text
//! <name> ── HUB1 ── CSMS
//! ```

use chrono::Utc;
use clap::Parser;
use ocpp_nn_core::protocol::negotiation::OCPP_21;
use ocpp_nn_core::{
    ChannelTransport, DataTransferRequest, DataTransferResponse, DataTransferStatus, Direction,
    Dispatcher, DispatcherConfig, HeartbeatRequest, HeartbeatResponse, NodeId, RequestOptions,
    RoutesConfig, Subprotocol, Via, WireFormat,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HUB_ID: &str = "HUB1";

/// OCPP networking node overlay demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Charging station node id
    #[arg(short, long, default_value = "CS001")]
    name: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON file with static routes for the station
    #[arg(long)]
    routes: Option<String>,

    /// Number of heartbeats the station sends
    #[arg(long, default_value = "3")]
    requests: u32,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Wire format (plain-text, hybrid, binary)
    #[arg(short, long, default_value = "plain-text")]
    format: WireFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let station_id: NodeId = args.name.parse()?;
    let timeout = Duration::from_millis(args.timeout_ms);
    let routes_label = args.routes.as_deref().unwrap_or("(built-in)");

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            OCPP Networking Node - Overlay Demo               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Station:  {:<50} ║", truncate(station_id.as_str(), 50));
    println!("║  Hub:      {:<50} ║", HUB_ID);
    println!("║  Routes:   {:<50} ║", truncate(routes_label, 50));
    println!("║  Format:   {:<50} ║", args.format.to_string());
    println!("║  Timeout:  {:<50} ║", format!("{} ms", args.timeout_ms));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let transport = Arc::new(ChannelTransport::new());
    let subprotocol = Subprotocol::new(OCPP_21, args.format);

    let station = Dispatcher::new(
        DispatcherConfig::new(station_id.clone())
            .with_request_timeout(timeout)
            .with_default_format(args.format),
        transport.clone(),
    );
    let hub = Dispatcher::new(
        DispatcherConfig::new(HUB_ID).with_request_timeout(timeout),
        transport.clone(),
    );
    let csms = Dispatcher::new(
        DispatcherConfig::new(NodeId::csms())
            .with_request_timeout(timeout)
            .with_default_format(args.format),
        transport.clone(),
    );

    let (station_end, hub_end) = transport.link(&station_id, &HUB_ID.into(), subprotocol.clone());
    station.attach_link(station_end, Direction::Outbound);
    hub.attach_link(hub_end, Direction::Inbound);

    let (hub_end, csms_end) = transport.link(&HUB_ID.into(), &NodeId::csms(), subprotocol);
    hub.attach_link(hub_end, Direction::Outbound);
    csms.attach_link(csms_end, Direction::Inbound);

    let routes = match &args.routes {
        Some(path) => RoutesConfig::from_file(path)?,
        None => RoutesConfig::from_json(&format!(
            r#"{{"routes": [{{"destinations": ["{}"], "hub": "{}"}}]}}"#,
            NodeId::csms(),
            HUB_ID
        ))?,
    };
    let applied = routes.apply(station.routes())?;
    info!(routes = applied, station = %station_id, "Static routes applied");

    csms.routes()
        .add_or_update_static_route(station_id.clone(), Via::Hub(HUB_ID.into()), 0, 1, None);

    csms.handlers().register_operation(|_req: HeartbeatRequest| async {
        Ok(HeartbeatResponse {
            current_time: Utc::now(),
        })
    });
    station
        .handlers()
        .register_operation(|req: DataTransferRequest| async move {
            let status = if req.vendor_id == "EK" {
                DataTransferStatus::Accepted
            } else {
                DataTransferStatus::UnknownVendorId
            };
            Ok(DataTransferResponse {
                status,
                data: req.data,
            })
        });

    let mut hub_events = hub.subscribe();
    for dispatcher in [&station, &hub, &csms] {
        dispatcher.spawn_timeout_sweeper();
    }

    info!("Sending {} heartbeat(s) to {}", args.requests, NodeId::csms());
    let mut failures = 0u32;
    for n in 1..=args.requests {
        let reply = station
            .send_operation(NodeId::csms(), HeartbeatRequest {}, RequestOptions::new())
            .await?;
        match &reply.body {
            Some(body) => println!(
                "  heartbeat #{:<3} {}  currentTime={}  ({:?})",
                n, reply.result, body.current_time, reply.runtime
            ),
            None => {
                failures += 1;
                println!("  heartbeat #{:<3} {}  ({:?})", n, reply.result, reply.runtime);
            }
        }
    }

    info!("Sending DataTransfer from {} to {}", NodeId::csms(), station_id);
    let reply = csms
        .send_operation(
            station_id.clone(),
            DataTransferRequest::new("EK")
                .with_message_id("limits")
                .with_data(json!({"limitKw": 11})),
            RequestOptions::new(),
        )
        .await?;
    match reply.into_result() {
        Ok(body) => println!("  data transfer  {:?}  data={:?}", body.status, body.data),
        Err(result) => {
            failures += 1;
            println!("  data transfer  {}", result);
        }
    }

    let mut forwarded = 0usize;
    while hub_events.try_recv().is_ok() {
        forwarded += 1;
    }

    println!();
    println!("Frames forwarded by {}: {}", HUB_ID, forwarded);
    println!("Pending requests: station={} csms={}", station.ledger().len(), csms.ledger().len());

    if failures > 0 {
        warn!(failures, "Some requests did not complete");
    }

    Ok(())
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate("CS001", 50), "CS001");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }

    #[test]
    fn test_truncate_multibyte() {
        let id = "ČŠĆŽĐ".repeat(20);
        let short = truncate(&id, 50);
        assert_eq!(short.chars().count(), 50);
        assert!(short.starts_with("ČŠĆŽĐ"));
        assert!(short.ends_with("..."));

        assert_eq!(truncate("čćž", 3), "čćž");
    }
}
