// Two actors bounce an array back and forth over a pair of shared-memory
// channels. Run with RUST_LOG=debug to see channel and actor lifecycle logs.
//
//   cargo run --example ping_pong -- 1000

use std::env;
use std::time::Instant;

use dmxp_dataflow::{
    Array, ChannelBuilder, DType, InPort, MessagingError, MultiProcessing, OutPort, PortData,
    PortInitializer, PortKind,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHAPE: [usize; 2] = [2, 4];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rounds: usize = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 1000,
    };

    let mut mp = MultiProcessing::new();
    mp.start()?;
    mp.stop_on_interrupt()?;

    let ping_port = PortInitializer::new("ping", &SHAPE, DType::Float64, 4);
    let pong_port = PortInitializer::new("pong", &SHAPE, DType::Float64, 4);
    let factory = mp.channel_factory().clone();
    let (ping_tx, ping_rx) = ChannelBuilder::new(ping_port.clone())
        .build(&factory)?
        .into_endpoints();
    let (pong_tx, pong_rx) = ChannelBuilder::new(pong_port.clone())
        .build(&factory)?
        .into_endpoints();

    // Echo side: answer every ping until the pinger hangs up
    let echo_in = InPort::<f64>::new(ping_port.clone(), PortKind::VectorDense, ping_rx)?;
    let echo_out = OutPort::<f64>::new(pong_port.clone(), PortKind::VectorDense, pong_tx)?;
    mp.build_actor(move |_actor| {
        echo_in.start()?;
        echo_out.start()?;
        loop {
            match echo_in.recv() {
                Ok(data) => echo_out.send_blocking(&data)?,
                Err(MessagingError::ChannelClosed { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        echo_in.join()?;
        echo_out.join()
    })?;

    let ping_out = OutPort::<f64>::new(ping_port, PortKind::VectorDense, ping_tx)?;
    let pong_in = InPort::<f64>::new(pong_port, PortKind::VectorDense, pong_rx)?;
    mp.build_actor(move |actor| {
        ping_out.start()?;
        pong_in.start()?;
        let started = Instant::now();
        for round in 0..rounds {
            if !actor.is_running() {
                break;
            }
            let values: Vec<f64> = (0..8).map(|i| (round * 8 + i) as f64).collect();
            let sent = PortData::Dense(Array::new(SHAPE.to_vec(), values)?);
            ping_out.send_blocking(&sent)?;
            let echoed = pong_in.recv()?;
            if echoed != sent {
                return Err(MessagingError::invalid_metadata(format!(
                    "round {} came back altered",
                    round
                )));
            }
        }
        info!(rounds, elapsed = ?started.elapsed(), "ping pong finished");
        ping_out.join()?;
        pong_in.join()
    })?;

    let ids: Vec<_> = mp.get_actors().iter().map(|a| a.id()).collect();
    for id in ids {
        let status = mp.wait(id)?;
        info!(actor = %id, ?status, "actor exited");
    }
    mp.stop(false)?;
    Ok(())
}
