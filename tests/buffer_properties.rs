// tests/buffer_properties.rs

use proptest::prelude::*;
use privrun::exec::CappedBuffer;

fn chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..32)
}

proptest! {
    #[test]
    fn never_exceeds_limit_and_keeps_a_prefix(limit in 1usize..256, input in chunks()) {
        let mut buf = CappedBuffer::new(limit);
        let mut all = Vec::new();

        for chunk in &input {
            let before = buf.bytes().to_vec();
            let appended = buf.append(chunk);
            all.extend_from_slice(chunk);

            prop_assert!(buf.len() <= limit);
            prop_assert!(buf.bytes().starts_with(&before));
            prop_assert_eq!(appended.kept, buf.len() - before.len());
            prop_assert_eq!(&buf.bytes()[before.len()..], &chunk[..appended.kept]);
        }

        let expected = &all[..all.len().min(limit)];
        prop_assert_eq!(buf.bytes(), expected);
        prop_assert_eq!(buf.is_truncated(), all.len() > limit);
    }

    #[test]
    fn truncation_is_sticky(limit in 1usize..32, extra in 1usize..64, tail in chunks()) {
        let mut buf = CappedBuffer::new(limit);
        buf.append(&vec![b'a'; limit + extra]);
        prop_assert!(buf.is_truncated());

        for chunk in &tail {
            let appended = buf.append(chunk);
            prop_assert_eq!(appended.kept, 0);
            prop_assert!(buf.is_truncated());
        }
        prop_assert_eq!(buf.len(), limit);
    }
}
