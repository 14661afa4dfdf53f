// Layout conformance tests for the shared-memory structures. Every field a
// peer process reads must sit at a fixed offset, so these assert sizes,
// alignments and offsets and print the observed values on mismatch.
use crossbeam_utils::CachePadded;
use dmxp_dataflow::Structs::{MetadataHeader, METADATA_HEADER_SIZE};
use dmxp_dataflow::Transport::Buffer::layout::{RingHeader, SlotHeader};
use memoffset::offset_of;
use std::mem::{align_of, size_of};
use std::sync::atomic::AtomicU64;

#[test]
fn test_metadata_header_layout() {
    // nd, dtype, elsize, total_size, then 5 dims and 5 strides, all i64
    let expected = 4 * 8 + 2 * 5 * 8;

    let size = size_of::<MetadataHeader>();
    let off_nd = offset_of!(MetadataHeader, nd);
    let off_dtype = offset_of!(MetadataHeader, dtype);
    let off_elsize = offset_of!(MetadataHeader, elsize);
    let off_total = offset_of!(MetadataHeader, total_size);
    let off_dims = offset_of!(MetadataHeader, dims);
    let off_strides = offset_of!(MetadataHeader, strides);

    println!(
        "MetadataHeader => size: {size}, expected: {expected}, offsets: [nd:{off_nd}, dtype:{off_dtype}, elsize:{off_elsize}, total_size:{off_total}, dims:{off_dims}, strides:{off_strides}]"
    );

    assert_eq!(size, expected);
    assert_eq!(METADATA_HEADER_SIZE, 112);
    assert_eq!(align_of::<MetadataHeader>(), align_of::<i64>());
    assert_eq!(off_nd, 0);
    assert_eq!(off_dtype, 8);
    assert_eq!(off_elsize, 16);
    assert_eq!(off_total, 24);
    assert_eq!(off_dims, 32);
    assert_eq!(off_strides, 72);
}

#[test]
fn test_ring_header_layout() {
    let pad = align_of::<CachePadded<AtomicU64>>();
    let size = size_of::<RingHeader>();
    let off_magic = offset_of!(RingHeader, magic);
    let off_version = offset_of!(RingHeader, version);
    let off_flags = offset_of!(RingHeader, flags);
    let off_capacity = offset_of!(RingHeader, capacity);
    let off_slot_size = offset_of!(RingHeader, slot_size);
    let off_signal = offset_of!(RingHeader, signal);
    let off_closed = offset_of!(RingHeader, closed);
    let off_evicted = offset_of!(RingHeader, evicted);
    let off_tail = offset_of!(RingHeader, tail);
    let off_head = offset_of!(RingHeader, head);

    println!(
        "RingHeader => size: {size}, align: {}, cache pad: {pad}, offsets: [magic:{off_magic}, version:{off_version}, flags:{off_flags}, capacity:{off_capacity}, slot_size:{off_slot_size}, signal:{off_signal}, closed:{off_closed}, evicted:{off_evicted}, tail:{off_tail}, head:{off_head}]",
        align_of::<RingHeader>()
    );

    assert_eq!(align_of::<RingHeader>(), 128);
    assert_eq!(size % 128, 0);
    assert_eq!(off_magic, 0);
    assert_eq!(off_version, 8);
    assert_eq!(off_flags, 12);
    assert_eq!(off_capacity, 16);
    assert_eq!(off_slot_size, 24);
    assert_eq!(off_signal, 32);
    assert_eq!(off_closed, 36);
    assert_eq!(off_evicted, 40);

    // cursors live on their own cache lines
    assert_eq!(off_tail % pad, 0);
    assert_eq!(off_head % pad, 0);
    assert!(off_head - off_tail >= pad);
}

#[test]
fn test_slot_header_layout() {
    assert_eq!(size_of::<SlotHeader>(), 16);
    assert_eq!(offset_of!(SlotHeader, len), 0);
    assert_eq!(offset_of!(SlotHeader, stamp), 8);
}
