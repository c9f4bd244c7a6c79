//! Indication node: prefers the slave role, holds temporary mastership only
//! while no master exists.

use std::net::IpAddr;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use luxnet::node::{Node, Role, CLUSTER_PORT};
use luxnet::transport::{self, Transport};

#[derive(Parser)]
#[command(
    name = "indication-node",
    version,
    about = "Sensor/display node for a street-light cluster",
    after_help = "Examples:\n  indication-node 0.0.0.0 239.255.0.1\n  indication-node :: ff31::8000:1234"
)]
struct Args {
    /// Local address to bind the cluster socket on
    listen_address: IpAddr,

    /// Multicast group the cluster coordinates on
    multicast_address: IpAddr,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("luxnet=info".parse().unwrap()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    let node = Node::new(Role::Indication);
    info!("indication node id={} port={}", node.block_id(), CLUSTER_PORT);

    let transport = match Transport::open(args.listen_address, args.multicast_address) {
        Ok(transport) => transport,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match transport::run(node, transport).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
