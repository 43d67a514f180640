use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use rand::Rng;
use shared::codec::tank_state::encode_tank_state;
use shared::envelope::with_length_prefix;
use shared::{
    DecodeContext, Packet, PacketCodec, TankState, TankStatePacket, UnitSchemaRegistry, Vec3,
    Vitals,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Reports a randomly drifting tank to a running server and prints the
/// updates it relays back
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:2627")]
    server: SocketAddr,
    /// Net id of the reported tank
    #[clap(short, long, default_value = "1")]
    net_id: u32,
    /// Unit type of the reported tank
    #[clap(short = 't', long, default_value = "1")]
    unit_type: u32,
    /// Unit schema table
    #[clap(short, long, default_value = "units.toml")]
    units: PathBuf,
    /// Number of updates to send
    #[clap(short, long, default_value = "10")]
    count: u32,
    /// Prefix every datagram with its length
    #[clap(long)]
    length_prefix: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let schemas = UnitSchemaRegistry::load_or_builtin(&args.units)?;
    let config = *schemas.lookup(args.unit_type)?;
    let codec = PacketCodec::new();

    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    let started = Instant::now();
    let mut rng = rand::thread_rng();
    let mut state = TankState::new(args.net_id, args.unit_type);
    let mut buf = [0u8; 2048];

    for i in 0..args.count {
        state.velocity = Vec3::new(
            rng.gen_range(-1.0..1.0),
            0.0,
            rng.gen_range(-1.0..1.0),
        );
        state.position.x += state.velocity.x;
        state.position.z += state.velocity.z;

        // Vitals go out every other update
        state.vitals = (i % 2 == 0).then(|| Vitals {
            weapon_id: rng.gen_range(0..32),
            health_mult: rng.gen_range(0..1024),
            energy_mult: rng.gen_range(0..1024),
            firing_mask: config.has_firing_mask.then(|| rng.gen_range(0..8192)),
            extra_a: config.has_extras.then(|| rng.gen_range(0..256)),
            extra_b: config.has_extras.then(|| rng.gen_range(0..256)),
        });

        let packet = TankStatePacket {
            timestamp: started.elapsed().as_millis() as u32,
            state: state.clone(),
        };
        let mut frame = encode_tank_state(&packet, &schemas)?;
        if args.length_prefix {
            frame = with_length_prefix(&frame).ok_or("frame too long for a length prefix")?;
        }

        info!("Sending update {} ({} bytes)", i, frame.len());
        socket.send_to(&frame, args.server).await?;

        // Print whatever the server relays until the next update is due
        while let Ok(received) = timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
            let (len, _) = received?;
            match codec.decode(&buf[..len], &DecodeContext::replay(&schemas)) {
                Ok(Packet::TankState(TankStatePacket { timestamp, state })) => {
                    info!(
                        "Tank {} (unit {}) at {:?}, tick {}, vitals {:?}",
                        state.net_id, state.unit_type, state.position, timestamp, state.vitals
                    );
                }
                Ok(other) => info!("Received {:?}", other),
                Err(e) => warn!("Failed to decode relayed frame: {}", e),
            }
        }

        socket.send_to(&[shared::OPCODE_KEEP_ALIVE], args.server).await?;
        sleep(Duration::from_millis(500)).await;
    }

    info!("Test client finished");
    Ok(())
}
