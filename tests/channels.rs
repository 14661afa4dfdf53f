// Channel semantics for the shared-memory ring and the DDS topics
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dmxp_dataflow::{
    ChannelBackend, ChannelFactory, DType, DdsBackend, DdsTransport, Metadata, MessagingError,
    RecvEndpoint, SendEndpoint, SharedMemManager,
};
use parking_lot::Mutex;
use serial_test::serial;

fn factory(prefix: &str) -> ChannelFactory {
    ChannelFactory::new(Arc::new(Mutex::new(SharedMemManager::with_prefix(prefix))))
}

fn shmem_pair(f: &ChannelFactory, name: &str, capacity: usize) -> (SendEndpoint, RecvEndpoint) {
    let channel = f
        .get_channel(ChannelBackend::SharedMemory, DType::Int64, name, &[4], capacity)
        .unwrap();
    let (tx, rx) = channel.into_endpoints();
    tx.start().unwrap();
    rx.start().unwrap();
    (tx, rx)
}

fn msg(v: i64) -> Metadata {
    Metadata::from_slice(&[4], &[v, v + 1, v + 2, v + 3]).unwrap()
}

fn first(m: &Metadata) -> i64 {
    m.to_vec::<i64>().unwrap()[0]
}

#[test]
#[serial]
fn test_shmem_fifo_round_trip() {
    let f = factory("dmxp_chan_fifo");
    let (tx, rx) = shmem_pair(&f, "fifo", 4);
    assert_eq!(tx.size(), 4);
    assert_eq!(rx.dtype(), Some(DType::Int64));
    assert_eq!(rx.shape(), Some(&[4usize][..]));

    for v in 0..3 {
        assert!(tx.send(&msg(v)).unwrap());
    }
    for v in 0..3 {
        let m = rx.recv().unwrap();
        assert_eq!(m, msg(v));
        assert_eq!(m.shape(), vec![4]);
    }
    assert!(!rx.probe().unwrap());
}

#[test]
#[serial]
fn test_shmem_peek_does_not_consume() {
    let f = factory("dmxp_chan_peek");
    let (tx, rx) = shmem_pair(&f, "peek", 4);
    tx.send(&msg(10)).unwrap();
    tx.send(&msg(20)).unwrap();

    assert_eq!(first(&rx.peek().unwrap()), 10);
    assert_eq!(first(&rx.peek().unwrap()), 10);
    let both = rx.peek_batch(2).unwrap();
    assert_eq!(both.iter().map(first).collect::<Vec<_>>(), vec![10, 20]);
    assert_eq!(first(&rx.recv().unwrap()), 10);
    assert_eq!(first(&rx.recv().unwrap()), 20);

    // more than the ring can ever hold
    assert!(matches!(
        rx.peek_batch(5),
        Err(MessagingError::ChannelInit { .. })
    ));
}

#[test]
#[serial]
fn test_shmem_full_ring_rejects() {
    let f = factory("dmxp_chan_full");
    let (tx, rx) = shmem_pair(&f, "full", 2);
    assert!(tx.probe().unwrap());
    assert!(tx.send(&msg(1)).unwrap());
    assert!(tx.send(&msg(2)).unwrap());
    assert!(!tx.probe().unwrap());
    assert!(!tx.send(&msg(3)).unwrap());

    // a batch that does not fit is not partially written
    rx.recv().unwrap();
    assert!(!tx.send_batch(&[msg(3), msg(4)]).unwrap());
    assert_eq!(first(&rx.recv().unwrap()), 2);
    assert!(!rx.probe().unwrap());
}

#[test]
#[serial]
fn test_shmem_random_payloads() {
    let f = factory("dmxp_chan_random");
    let channel = f
        .get_channel(ChannelBackend::SharedMemory, DType::Float32, "random", &[8, 8], 4)
        .unwrap();
    let (tx, rx) = channel.into_endpoints();
    tx.start().unwrap();
    rx.start().unwrap();

    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..200 {
        // any shape up to the channel's 64 elements fits a slot
        let shape = [rng.usize(1..=8), rng.usize(1..=8)];
        let values: Vec<f32> = (0..shape[0] * shape[1]).map(|_| rng.f32()).collect();
        let sent = Metadata::from_slice(&shape, &values).unwrap();
        assert!(tx.send(&sent).unwrap());
        let got = rx.recv().unwrap();
        assert_eq!(got.shape(), shape.to_vec());
        assert_eq!(got.to_vec::<f32>().unwrap(), values);
    }
}

#[test]
#[serial]
fn test_shmem_oversized_message() {
    let f = factory("dmxp_chan_big");
    let (tx, _rx) = shmem_pair(&f, "big", 2);
    let big = Metadata::from_slice(&[64], &[0i64; 64]).unwrap();
    assert!(matches!(
        tx.send(&big),
        Err(MessagingError::MessageTooLarge { .. })
    ));
}

#[test]
#[serial]
fn test_shmem_lifecycle_errors() {
    let f = factory("dmxp_chan_life");
    let channel = f
        .get_channel(ChannelBackend::SharedMemory, DType::Int64, "life", &[4], 2)
        .unwrap();
    let (tx, rx) = channel.into_endpoints();

    // not started yet
    assert!(matches!(tx.send(&msg(0)), Err(MessagingError::ChannelInit { .. })));

    tx.start().unwrap();
    tx.start().unwrap();
    rx.start().unwrap();
    tx.join().unwrap();
    tx.join().unwrap();
    assert!(matches!(tx.send(&msg(0)), Err(MessagingError::ChannelClosed { .. })));
    assert!(matches!(tx.start(), Err(MessagingError::ChannelClosed { .. })));

    // sender gone and nothing queued
    assert!(matches!(rx.recv(), Err(MessagingError::ChannelClosed { .. })));
    rx.join().unwrap();
    assert!(matches!(rx.probe(), Err(MessagingError::ChannelClosed { .. })));
}

#[test]
#[serial]
fn test_shmem_drains_after_sender_join() {
    let f = factory("dmxp_chan_drain");
    let (tx, rx) = shmem_pair(&f, "drain", 4);
    tx.send(&msg(7)).unwrap();
    tx.join().unwrap();
    assert_eq!(first(&rx.recv().unwrap()), 7);
    assert!(matches!(rx.recv(), Err(MessagingError::ChannelClosed { .. })));
}

#[test]
#[serial]
fn test_shmem_send_after_receiver_join() {
    let f = factory("dmxp_chan_rx_gone");
    let (tx, rx) = shmem_pair(&f, "rx_gone", 4);
    rx.join().unwrap();
    assert!(matches!(tx.send(&msg(0)), Err(MessagingError::ChannelClosed { .. })));
}

#[test]
#[serial]
fn test_shmem_use_after_release() {
    let f = factory("dmxp_chan_released");
    let (tx, rx) = shmem_pair(&f, "released", 4);
    f.shared_mem_manager().lock().stop();
    assert!(matches!(tx.send(&msg(0)), Err(MessagingError::UseAfterRelease { .. })));
    assert!(matches!(rx.probe(), Err(MessagingError::UseAfterRelease { .. })));
    // joining a released channel still succeeds
    tx.join().unwrap();
    rx.join().unwrap();
}

#[test]
#[serial]
fn test_shmem_blocking_recv_across_threads() {
    let f = factory("dmxp_chan_threads");
    let (tx, rx) = shmem_pair(&f, "threads", 3);
    let sender = thread::spawn(move || {
        for v in 0..10_000 {
            while !tx.send(&msg(v)).unwrap() {
                thread::yield_now();
            }
        }
        tx.join().unwrap();
    });
    let mut expected = 0;
    loop {
        match rx.recv() {
            Ok(m) => {
                assert_eq!(first(&m), expected);
                expected += 1;
            }
            Err(MessagingError::ChannelClosed { .. }) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(expected, 10_000);
    sender.join().unwrap();
}

#[test]
#[serial]
fn test_dds_shm_keep_last() {
    let f = factory("dmxp_chan_dds");
    let channel = f
        .get_dds_channel("dds_keep_last", DdsTransport::Shm, DdsBackend::FastDds, 5)
        .unwrap();
    assert_eq!(channel.depth(), 5);
    let tx = channel.get_send_port();
    let rx = channel.get_recv_port();
    tx.start().unwrap();
    rx.start().unwrap();

    // publishing never blocks; the oldest samples are dropped
    for v in 0..12 {
        assert!(tx.send(&msg(v)).unwrap());
    }
    assert_eq!(rx.evicted().unwrap(), 7);
    assert_eq!(first(&rx.peek().unwrap()), 7);
    let got: Vec<i64> = (0..5).map(|_| first(&rx.recv().unwrap())).collect();
    assert_eq!(got, vec![7, 8, 9, 10, 11]);
    assert!(!rx.probe().unwrap());

    tx.join().unwrap();
    assert!(matches!(rx.recv(), Err(MessagingError::ChannelClosed { .. })));
    rx.join().unwrap();
}

#[test]
#[serial]
fn test_dds_backends_use_separate_topics() {
    let f = factory("dmxp_chan_dds_backends");
    let fast = f
        .get_dds_channel("dds_shared_name", DdsTransport::Shm, DdsBackend::FastDds, 2)
        .unwrap();
    let cyclone = f
        .get_dds_channel("dds_shared_name", DdsTransport::Shm, DdsBackend::CycloneDds, 2)
        .unwrap();
    let (fast_tx, fast_rx) = (fast.get_send_port(), fast.get_recv_port());
    let cyclone_rx = cyclone.get_recv_port();
    fast_tx.start().unwrap();
    fast_rx.start().unwrap();
    cyclone_rx.start().unwrap();

    fast_tx.send(&msg(1)).unwrap();
    assert_eq!(first(&fast_rx.recv().unwrap()), 1);
    assert!(!cyclone_rx.probe().unwrap());

    fast_tx.join().unwrap();
    fast_rx.join().unwrap();
    cyclone_rx.join().unwrap();
}

#[test]
#[serial]
fn test_dds_udp_round_trip() {
    let f = factory("dmxp_chan_udp");
    let channel = f
        .get_dds_channel("dds_udp", DdsTransport::Udp, DdsBackend::CycloneDds, 4)
        .unwrap();
    let tx = channel.get_send_port();
    let rx = channel.get_recv_port();
    // the reader has to be bound before anything is published
    rx.start().unwrap();
    tx.start().unwrap();

    for v in 0..3 {
        assert!(tx.send(&msg(v)).unwrap());
    }
    for v in 0..3 {
        assert_eq!(first(&rx.recv().unwrap()), v);
    }
    tx.join().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(matches!(rx.recv(), Err(MessagingError::ChannelClosed { .. })));
    rx.join().unwrap();
}

#[test]
#[serial]
fn test_dds_zero_depth_rejected() {
    let f = factory("dmxp_chan_dds_zero");
    assert!(matches!(
        f.get_dds_channel("dds_zero", DdsTransport::Shm, DdsBackend::FastDds, 0),
        Err(MessagingError::ChannelInit { .. })
    ));
}
