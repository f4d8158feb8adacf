//! Property-based tests of the buffer accounting.

use proptest::prelude::*;
use sdrflow::{
    Error, Tag,
    buffers::{Buffer, BufferKind},
};

fn buffer(kind: BufferKind) -> Buffer {
    // 1024 items of 4 bytes
    Buffer::allocate_with(4096, 4, kind).unwrap()
}

fn kind() -> impl Strategy<Value = BufferKind> {
    prop_oneof![Just(BufferKind::Auto), Just(BufferKind::Heap)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Readers see exactly the items committed and not consumed yet, in
    /// order, whatever the interleaving of writes and reads.
    #[test]
    fn available_tracks_commits_and_consumes(
        ops in prop::collection::vec((any::<bool>(), 0usize..300), 1..300),
        kind in kind(),
    ) {
        let mut buffer = buffer(kind);
        let mut reader = buffer.add_reader(0).unwrap();
        let mut committed = 0u64;
        let mut consumed = 0u64;
        for (write, n) in ops {
            if write {
                let slot = buffer.write_slot();
                let n = n.min(slot.items);
                for (k, chunk) in slot.bytes.chunks_exact_mut(4).take(n).enumerate() {
                    chunk.copy_from_slice(&((committed + k as u64) as u32).to_ne_bytes());
                }
                buffer.commit_write(n).unwrap();
                committed += n as u64;
            } else if n > reader.available_items() {
                prop_assert!(
                    matches!(reader.consume(n), Err(Error::Underrun { .. })),
                    "consuming {} items did not underrun",
                    n
                );
            } else {
                for (k, chunk) in reader.read_slot().chunks_exact(4).take(n).enumerate() {
                    let value = u32::from_ne_bytes(chunk.try_into().unwrap());
                    prop_assert_eq!(u64::from(value), consumed + k as u64);
                }
                reader.consume(n).unwrap();
                consumed += n as u64;
            }
            prop_assert_eq!(reader.available_items() as u64, committed - consumed);
            prop_assert_eq!(reader.nitems_read(), consumed);
            prop_assert_eq!(buffer.nitems_written(), committed);
            prop_assert_eq!(
                buffer.space_available() + reader.available_items(),
                buffer.capacity()
            );
        }
    }

    /// Committing more than the last write slot reported always fails.
    #[test]
    fn commit_beyond_slot_overruns(
        nreaders in 0usize..4,
        history in 0usize..16,
        written in 0usize..2000,
        extra in 1usize..100,
        kind in kind(),
    ) {
        let mut buffer = buffer(kind);
        let _readers = (0..nreaders)
            .map(|_| buffer.add_reader(history).unwrap())
            .collect::<Vec<_>>();
        let first = buffer.write_slot().items.min(written);
        buffer.commit_write(first).unwrap();

        let reported = buffer.write_slot().items;
        prop_assert!(matches!(
            buffer.commit_write(reported + extra),
            Err(Error::Overrun { .. })
        ), "expected Error::Overrun");
        // a partial commit reduces what is left of the slot
        let half = reported / 2;
        buffer.commit_write(half).unwrap();
        prop_assert!(matches!(
            buffer.commit_write(reported - half + extra),
            Err(Error::Overrun { .. })
        ), "expected Error::Overrun");
    }

    /// A reader attached mid-stream only sees the items written after it.
    #[test]
    fn late_reader_starts_empty(written in 0usize..1024, later in 0usize..512) {
        let mut buffer = buffer(BufferKind::Heap);
        let _first = buffer.add_reader(0).unwrap();
        let n = buffer.write_slot().items.min(written);
        buffer.commit_write(n).unwrap();
        let late = buffer.add_reader(0).unwrap();
        prop_assert_eq!(late.available_items(), 0);
        prop_assert_eq!(late.nitems_read(), n as u64);

        let m = buffer.write_slot().items.min(later);
        buffer.commit_write(m).unwrap();
        prop_assert_eq!(late.available_items(), m);
    }

    /// A tag is returned once by a range covering its item, and is pruned
    /// once every reader has moved past it.
    #[test]
    fn tags_are_pruned_after_every_reader(index in 0usize..500, lag in 0usize..10) {
        let mut buffer = buffer(BufferKind::Heap);
        let mut fast = buffer.add_reader(0).unwrap();
        let mut slow = buffer.add_reader(0).unwrap();
        buffer.write_slot();
        buffer.add_tag(Tag::new(index as u64, "index", index as u64));
        buffer.commit_write(600).unwrap();

        let index = index as u64;
        let tags = fast.tags_in_range(index, index + 1);
        prop_assert_eq!(tags.len(), 1);
        prop_assert_eq!(tags[0].offset, index);
        prop_assert!(fast.tags_in_range(index + 1, 600).is_empty());

        fast.consume(index as usize + 1).unwrap();
        prop_assert_eq!(buffer.tag_count(), 1);
        slow.consume((index as usize + 1).saturating_sub(lag)).unwrap();
        prop_assert_eq!(buffer.tag_count(), usize::from(lag > 0));
        slow.consume(lag.min(600 - slow.nitems_read() as usize)).unwrap();
        prop_assert_eq!(buffer.tag_count(), 0);
    }
}
