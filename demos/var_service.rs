// One actor owns a sparse variable and services reads and writes from
// another actor through a RefPort/VarPort pair.
//
//   cargo run --example var_service

use std::thread;
use std::time::Duration;

use dmxp_dataflow::{
    ActorStatus, ChannelBuilder, DType, MultiProcessing, PortData, PortInitializer, PortKind,
    RefPort, SparseArray, VarPort,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut mp = MultiProcessing::new();
    mp.start()?;
    mp.stop_on_interrupt()?;

    let var = PortInitializer::new("weights", &[16], DType::Int32, 4);
    let factory = mp.channel_factory().clone();
    // requests carry [command, indices, values] as one batch
    let (req_tx, req_rx) = ChannelBuilder::new(var.clone())
        .with_capacity(6)
        .build(&factory)?
        .into_endpoints();
    let (resp_tx, resp_rx) = ChannelBuilder::new(var.clone())
        .build(&factory)?
        .into_endpoints();

    let owner = VarPort::<i32>::new(var.clone(), PortKind::VectorSparse, req_rx, resp_tx)?;
    let owner_id = mp.build_actor(move |actor| {
        owner.start()?;
        let mut value = PortData::zeros(PortKind::VectorSparse, &[16]);
        while actor.wait_while_paused() == ActorStatus::Running {
            if owner.service(&mut value)? == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        info!(final_value = ?value.to_dense().data(), "var owner stopping");
        owner.join()
    })?;

    let client = RefPort::<i32>::new(var, PortKind::VectorSparse, req_tx, resp_rx)?;
    let client_id = mp.build_actor(move |_actor| {
        client.start()?;
        for step in 0..5i32 {
            let update = SparseArray::new(16, vec![step as i64, 15], vec![step * 10, step])?;
            client.write(&PortData::Sparse(update))?;
            let current = client.read()?;
            info!(step, dense = ?current.to_dense().data(), "read back");
        }
        client.join()
    })?;

    let status = mp.wait(client_id)?;
    info!(?status, "client finished");
    let status = mp.stop_actor(owner_id, false)?;
    info!(?status, "owner finished");
    mp.stop(false)?;
    Ok(())
}
