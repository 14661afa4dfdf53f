// Typed ports over shared-memory channels, single process
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dmxp_dataflow::{
    Array, ChannelBuilder, ChannelFactory, DType, InPort, MessagingError, Metadata, OutPort,
    PortData, PortInitializer, PortKind, RefPort, SharedMemManager, SparseArray, TransformOp,
    Transformer, VarPort, VarRequest, VirtualPortTransformer,
};
use parking_lot::Mutex;
use serial_test::serial;

fn factory(prefix: &str) -> ChannelFactory {
    ChannelFactory::new(Arc::new(Mutex::new(SharedMemManager::with_prefix(prefix))))
}

fn grid(rows: usize, cols: usize) -> Array<f64> {
    let values = (0..rows * cols).map(|v| v as f64).collect();
    Array::new(vec![rows, cols], values).unwrap()
}

#[test]
#[serial]
fn test_dense_round_trip() {
    let f = factory("dmxp_ports_dense");
    let port = PortInitializer::new("dense", &[3, 4], DType::Float64, 2);
    let (tx, rx) = ChannelBuilder::new(port.clone()).build(&f).unwrap().into_endpoints();
    assert_eq!(tx.size(), 2);

    let out = OutPort::<f64>::new(port.clone(), PortKind::VectorDense, tx).unwrap();
    let inp = InPort::<f64>::new(port, PortKind::VectorDense, rx).unwrap();
    out.start().unwrap();
    inp.start().unwrap();

    let data = PortData::Dense(grid(3, 4));
    assert!(out.send(&data).unwrap());
    assert!(out.send(&data).unwrap());
    // ring of two is now full
    assert!(!out.send(&data).unwrap());
    assert!(!out.probe().unwrap());

    assert_eq!(inp.peek().unwrap(), data);
    assert_eq!(inp.recv().unwrap(), data);
    assert_eq!(inp.recv().unwrap(), data);
    assert!(!inp.probe().unwrap());
}

#[test]
#[serial]
fn test_virtual_port_reshape() {
    let f = factory("dmxp_ports_reshape");
    let src = PortInitializer::new("src", &[3, 4], DType::Float64, 4);
    let dst = PortInitializer::new("dst", &[12], DType::Float64, 4);
    let (tx, rx) = ChannelBuilder::new(src.clone())
        .with_dst(dst.clone())
        .build(&f)
        .unwrap()
        .into_endpoints();
    assert_eq!(tx.shape(), Some(&[12usize][..]));

    let transformer: Transformer = VirtualPortTransformer::reshape(&[12]).into();
    let out =
        OutPort::<f64>::with_transformer(src, PortKind::VectorDense, tx, transformer).unwrap();
    let inp = InPort::<f64>::new(dst, PortKind::VectorDense, rx).unwrap();
    assert_eq!(
        out.transformer().get_transform(),
        &[TransformOp::Reshape(vec![12])]
    );
    out.start().unwrap();
    inp.start().unwrap();

    out.send_blocking(&PortData::Dense(grid(3, 4))).unwrap();
    match inp.recv().unwrap() {
        PortData::Dense(a) => {
            assert_eq!(a.shape(), &[12]);
            assert_eq!(a.data(), grid(3, 4).data());
        }
        other => panic!("expected dense payload, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_rejected_sends_leave_channel_empty() {
    let f = factory("dmxp_ports_reject");
    let src = PortInitializer::new("src", &[3, 4], DType::Float64, 4);
    let dst = PortInitializer::new("dst", &[12], DType::Float64, 4);
    let (tx, rx) = ChannelBuilder::new(src.clone())
        .with_dst(dst.clone())
        .build(&f)
        .unwrap()
        .into_endpoints();

    // no transformer: the [3, 4] message does not conform to the [12] channel
    let out = OutPort::<f64>::new(src, PortKind::VectorDense, tx).unwrap();
    let inp = InPort::<f64>::new(dst, PortKind::VectorDense, rx).unwrap();
    out.start().unwrap();
    inp.start().unwrap();

    let err = out.send(&PortData::Dense(grid(3, 4))).unwrap_err();
    assert!(matches!(err, MessagingError::Transform { .. }), "{err}");

    // wrong shape for the sending port itself
    let err = out.send(&PortData::Dense(grid(2, 2))).unwrap_err();
    assert!(matches!(err, MessagingError::ShapeMismatch { .. }), "{err}");

    // wrong payload kind
    let err = out.send(&PortData::Scalar(1.0)).unwrap_err();
    assert!(matches!(err, MessagingError::ShapeMismatch { .. }), "{err}");

    assert!(!inp.probe().unwrap());
}

#[test]
#[serial]
fn test_port_dtype_checked() {
    let f = factory("dmxp_ports_dtype");
    let port = PortInitializer::new("ints", &[4], DType::Int32, 2);
    let (tx, rx) = ChannelBuilder::new(port.clone()).build(&f).unwrap().into_endpoints();
    assert!(matches!(
        OutPort::<f64>::new(port.clone(), PortKind::VectorDense, tx),
        Err(MessagingError::ShapeMismatch { .. })
    ));
    let other = PortInitializer::new("ints", &[5], DType::Int32, 2);
    assert!(matches!(
        InPort::<i32>::new(other, PortKind::VectorDense, rx),
        Err(MessagingError::ShapeMismatch { .. })
    ));
}

#[test]
#[serial]
fn test_sparse_and_scalar_payloads() {
    let f = factory("dmxp_ports_sparse");
    let port = PortInitializer::new("sparse", &[10], DType::Int32, 4);
    let (tx, rx) = ChannelBuilder::new(port.clone()).build(&f).unwrap().into_endpoints();
    let out = OutPort::<i32>::new(port.clone(), PortKind::VectorSparse, tx).unwrap();
    let inp = InPort::<i32>::new(port, PortKind::VectorSparse, rx).unwrap();
    out.start().unwrap();
    inp.start().unwrap();

    let sparse = SparseArray::new(10, vec![1, 7], vec![-3, 9]).unwrap();
    out.send_blocking(&PortData::Sparse(sparse.clone())).unwrap();
    let peeked = inp.peek().unwrap();
    let got = inp.recv().unwrap();
    assert_eq!(peeked, got);
    assert_eq!(got, PortData::Sparse(sparse));
    assert_eq!(got.to_dense().data(), &[0, -3, 0, 0, 0, 0, 0, 9, 0, 0]);

    let scalar_port = PortInitializer::new("scalar", &[1], DType::Int16, 2);
    let (tx, rx) = ChannelBuilder::new(scalar_port.clone())
        .build(&f)
        .unwrap()
        .into_endpoints();
    let out = OutPort::<i16>::new(scalar_port.clone(), PortKind::ScalarSparse, tx).unwrap();
    let inp = InPort::<i16>::new(scalar_port, PortKind::ScalarSparse, rx).unwrap();
    out.start().unwrap();
    inp.start().unwrap();
    let value = PortData::SparseScalar { index: 4, value: 12 };
    assert!(out.send(&value).unwrap());
    assert_eq!(inp.recv().unwrap(), value);
}

#[test]
#[serial]
fn test_batches_deeper_than_ring_rejected_up_front() {
    let f = factory("dmxp_ports_shallow");
    // a sparse payload is two messages; a depth-1 ring can never take it
    let port = PortInitializer::new("shallow", &[10], DType::Int32, 1);
    let (tx, rx) = ChannelBuilder::new(port.clone()).build(&f).unwrap().into_endpoints();
    assert!(matches!(
        OutPort::<i32>::new(port.clone(), PortKind::VectorSparse, tx.clone()),
        Err(MessagingError::ChannelInit { .. })
    ));
    // a dense port on the same ring is fine
    let out = OutPort::<i32>::new(port, PortKind::VectorDense, tx.clone()).unwrap();
    drop(out);

    // the endpoint refuses the batch too instead of reporting a full ring
    tx.start().unwrap();
    rx.start().unwrap();
    let message = Metadata::from_slice(&[10], &[0i32; 10]).unwrap();
    let batch = [message.clone(), message];
    assert!(matches!(
        tx.send_batch(&batch),
        Err(MessagingError::ChannelInit { .. })
    ));
    assert!(!rx.probe().unwrap());

    // a sparse SET is three messages
    let var = PortInitializer::new("shallow_var", &[6], DType::Float32, 2);
    let (req_tx, req_rx) = ChannelBuilder::new(var.clone()).build(&f).unwrap().into_endpoints();
    let (resp_tx, resp_rx) = ChannelBuilder::new(var.clone()).build(&f).unwrap().into_endpoints();
    assert!(matches!(
        RefPort::<f32>::new(var.clone(), PortKind::VectorSparse, req_tx, resp_rx),
        Err(MessagingError::ChannelInit { .. })
    ));
    assert!(matches!(
        VarPort::<f32>::new(var, PortKind::VectorSparse, req_rx, resp_tx),
        Err(MessagingError::ChannelInit { .. })
    ));
}

#[test]
#[serial]
fn test_ref_and_var_ports() {
    let f = factory("dmxp_ports_var");
    let var = PortInitializer::new("var", &[6], DType::Float32, 4);
    let (req_tx, req_rx) = ChannelBuilder::new(var.clone())
        .with_capacity(4)
        .build(&f)
        .unwrap()
        .into_endpoints();
    let (resp_tx, resp_rx) = ChannelBuilder::new(var.clone())
        .build(&f)
        .unwrap()
        .into_endpoints();

    let owner = VarPort::<f32>::new(var.clone(), PortKind::VectorSparse, req_rx, resp_tx).unwrap();
    let client = RefPort::<f32>::new(var, PortKind::VectorSparse, req_tx, resp_rx).unwrap();
    owner.start().unwrap();
    client.start().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let done_flag = Arc::clone(&done);
    let server = thread::spawn(move || {
        let mut value = PortData::<f32>::zeros(PortKind::VectorSparse, &[6]);
        let mut handled = 0;
        while !done_flag.load(Ordering::Acquire) {
            handled += owner.service(&mut value).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        owner.join().unwrap();
        (handled, value)
    });

    assert_eq!(client.read().unwrap(), PortData::Sparse(SparseArray::empty(6)));
    let update = PortData::Sparse(SparseArray::new(6, vec![0, 5], vec![1.5, -2.0]).unwrap());
    client.write(&update).unwrap();
    assert_eq!(client.read().unwrap(), update);

    done.store(true, Ordering::Release);
    let (handled, value) = server.join().unwrap();
    assert_eq!(handled, 3);
    assert_eq!(value, update);
    client.join().unwrap();
}

#[test]
#[serial]
fn test_var_port_peek_then_recv() {
    let f = factory("dmxp_ports_var_peek");
    let var = PortInitializer::new("var", &[2], DType::Int64, 4);
    let (req_tx, req_rx) = ChannelBuilder::new(var.clone()).build(&f).unwrap().into_endpoints();
    let (resp_tx, resp_rx) = ChannelBuilder::new(var.clone()).build(&f).unwrap().into_endpoints();
    let owner = VarPort::<i64>::new(var.clone(), PortKind::VectorDense, req_rx, resp_tx).unwrap();
    let client = RefPort::<i64>::new(var, PortKind::VectorDense, req_tx, resp_rx).unwrap();
    owner.start().unwrap();
    client.start().unwrap();

    let value = PortData::Dense(Array::new(vec![2], vec![3, 4]).unwrap());
    client.write(&value).unwrap();
    assert!(owner.probe().unwrap());
    assert_eq!(owner.peek().unwrap(), VarRequest::Write(value.clone()));
    assert_eq!(owner.recv().unwrap(), VarRequest::Write(value));
    assert!(!owner.probe().unwrap());
}
