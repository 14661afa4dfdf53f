// Ring buffer tests over real shared-memory segments
use dmxp_dataflow::Transport::Buffer::layout::{
    CLOSED_BY_RECEIVER, CLOSED_BY_SENDER, FLAG_KEEP_LAST, FLAG_SPSC,
};
use dmxp_dataflow::Transport::Buffer::RingBuffer;
use dmxp_dataflow::{SharedMemManager, SharedSegment};
use serial_test::serial;
use std::thread;

const SLOT: usize = 64;

fn make_ring(shmm: &mut SharedMemManager, capacity: usize, flags: u32) -> (SharedSegment, RingBuffer) {
    let segment = shmm
        .alloc_shared_memory(RingBuffer::region_size(capacity, SLOT))
        .unwrap();
    let ring = segment
        .with(|base, _| unsafe { RingBuffer::init(base, capacity, SLOT, flags) })
        .unwrap();
    (segment, ring)
}

#[test]
#[serial]
fn simple_push_pop() {
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_simple");
    let (_segment, rb) = make_ring(&mut shmm, 16, FLAG_SPSC);

    assert!(rb.is_empty());
    assert!(rb.try_push(&[1, 2, 3, 4]));
    assert_eq!(rb.len(), 1);
    assert_eq!(rb.peek(), Some(vec![1, 2, 3, 4]));
    assert_eq!(rb.try_pop(), Some(vec![1, 2, 3, 4]));
    assert_eq!(rb.try_pop(), None);
}

#[test]
#[serial]
fn full_buffer() {
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_full");
    let (_segment, rb) = make_ring(&mut shmm, 4, FLAG_SPSC);

    for i in 0..4u8 {
        assert!(rb.try_push(&[i; 8]));
    }
    // full ring rejects and leaves contents alone
    assert!(!rb.try_push(&[9; 8]));
    assert_eq!(rb.len(), 4);

    assert_eq!(rb.try_pop(), Some(vec![0; 8]));
    assert!(rb.try_push(&[9; 8]));
    for expected in [1u8, 2, 3, 9] {
        assert_eq!(rb.try_pop(), Some(vec![expected; 8]));
    }
}

#[test]
#[serial]
fn batch_is_all_or_nothing() {
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_batch");
    let (_segment, rb) = make_ring(&mut shmm, 3, FLAG_SPSC);

    assert!(rb.try_push(&[0]));
    assert!(!rb.try_push_batch(&[&[1], &[2], &[3]]));
    assert_eq!(rb.len(), 1);
    assert!(rb.try_push_batch(&[&[1], &[2]]));
    assert_eq!(rb.peek_at(0), Some(vec![0]));
    assert_eq!(rb.peek_at(2), Some(vec![2]));
    assert_eq!(rb.peek_at(3), None);
}

#[test]
#[serial]
fn wraparound_keeps_fifo() {
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_wrap");
    let (_segment, rb) = make_ring(&mut shmm, 5, FLAG_SPSC);

    for i in 0..1000u32 {
        assert!(rb.try_push(&i.to_le_bytes()));
        if i % 3 == 2 {
            for _ in 0..3 {
                rb.try_pop().unwrap();
            }
        }
    }
    let expected_left = 1000 % 3;
    assert_eq!(rb.len(), expected_left as usize);
}

#[test]
#[serial]
fn keep_last_evicts_oldest() {
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_keep_last");
    let (_segment, rb) = make_ring(&mut shmm, 5, FLAG_KEEP_LAST);
    assert!(rb.is_keep_last());

    for i in 0..10u8 {
        let evicted = rb.publish_evicting(&[i]);
        assert_eq!(evicted, i >= 5);
    }
    assert_eq!(rb.evicted(), 5);
    assert_eq!(rb.len(), 5);
    assert_eq!(rb.peek_history(1), Some(vec![6]));
    for expected in 5..10u8 {
        assert_eq!(rb.take_history(), Some(vec![expected]));
    }
    assert_eq!(rb.take_history(), None);
}

#[test]
#[serial]
fn close_bits() {
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_close");
    let (_segment, rb) = make_ring(&mut shmm, 2, FLAG_SPSC);

    assert_eq!(rb.closed_bits(), 0);
    rb.close(CLOSED_BY_SENDER);
    assert!(rb.closed_by(CLOSED_BY_SENDER));
    assert!(!rb.closed_by(CLOSED_BY_RECEIVER));
    rb.close(CLOSED_BY_RECEIVER);
    assert_eq!(rb.closed_bits(), CLOSED_BY_SENDER | CLOSED_BY_RECEIVER);
}

#[test]
#[serial]
fn attach_sees_same_ring() {
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_attach");
    let (segment, rb) = make_ring(&mut shmm, 4, FLAG_SPSC);
    assert!(rb.try_push(b"hello"));

    let view = segment
        .with(|base, len| unsafe { RingBuffer::attach(base, len) })
        .unwrap()
        .unwrap();
    assert_eq!(view.capacity(), 4);
    assert_eq!(view.slot_size(), SLOT);
    assert_eq!(view.try_pop(), Some(b"hello".to_vec()));
    assert!(rb.is_empty());
}

#[test]
#[serial]
fn concurrent_spsc() {
    const COUNT: u64 = 100_000;
    let mut shmm = SharedMemManager::with_prefix("dmxp_ring_threads");
    let (segment, _rb) = make_ring(&mut shmm, 8, FLAG_SPSC);

    let producer_segment = segment.clone();
    let producer = thread::spawn(move || {
        let rb = producer_segment
            .with(|base, len| unsafe { RingBuffer::attach(base, len) })
            .unwrap()
            .unwrap();
        for i in 0..COUNT {
            while !rb.try_push(&i.to_le_bytes()) {
                thread::yield_now();
            }
        }
    });

    let rb = segment
        .with(|base, len| unsafe { RingBuffer::attach(base, len) })
        .unwrap()
        .unwrap();
    let mut next = 0u64;
    while next < COUNT {
        if let Some(bytes) = rb.try_pop() {
            let value = u64::from_le_bytes(bytes.try_into().unwrap());
            assert_eq!(value, next);
            next += 1;
        } else {
            thread::yield_now();
        }
    }
    producer.join().unwrap();
}
