use icap_scan::parser::wire::{chunk_len, decode_chunked, parse_one_chunk, write_chunked};
use icap_scan::parser::{CHUNKED_TERMINATOR, parse_header};
use proptest::prelude::*;

fn encode(payload: &[u8], parts: usize) -> Vec<u8> {
    let mut out = Vec::new();
    write_chunked(&mut out, payload, parts).expect("write_chunked");
    out
}

proptest! {
    #[test]
    fn chunked_body_decodes_to_payload(
        payload in proptest::collection::vec(any::<u8>(), 1..4096),
        parts in 1usize..64,
    ) {
        let out = encode(&payload, parts);
        prop_assert!(out.ends_with(CHUNKED_TERMINATOR));
        prop_assert_eq!(decode_chunked(&out), Some(payload));
    }

    #[test]
    fn every_chunk_but_the_last_is_full(
        payload in proptest::collection::vec(any::<u8>(), 1..4096),
        parts in 1usize..64,
    ) {
        let out = encode(&payload, parts);
        let step = chunk_len(payload.len(), parts);

        let mut sizes = Vec::new();
        let mut pos = 0;
        while let Some((next, is_final, size)) = parse_one_chunk(&out, pos) {
            if is_final {
                break;
            }
            sizes.push(size);
            pos = next;
        }

        prop_assert!(sizes.len() <= parts);
        prop_assert_eq!(sizes.iter().sum::<usize>(), payload.len());
        let (last, full) = sizes.split_last().expect("at least one chunk");
        prop_assert!(full.iter().all(|&s| s == step));
        prop_assert!(*last >= 1 && *last <= step);
    }

    #[test]
    fn more_partitions_than_bytes_sends_single_byte_chunks(
        payload in proptest::collection::vec(any::<u8>(), 1..32),
        extra in 0usize..10_000,
    ) {
        let parts = payload.len() + extra;
        let out = encode(&payload, parts);
        let expected: Vec<u8> = payload
            .iter()
            .flat_map(|b| {
                let mut c = b"1\r\n".to_vec();
                c.push(*b);
                c.extend_from_slice(b"\r\n");
                c
            })
            .chain(CHUNKED_TERMINATOR.iter().copied())
            .collect();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn header_parser_never_panics(text in "\\PC{0,256}") {
        let _ = parse_header(&text);
    }

    #[test]
    fn status_line_round_trips(code in 100u16..1000, reason in "[A-Za-z ]{0,20}") {
        let text = format!("ICAP/1.0 {code} {reason}\r\nISTag: x\r\n\r\n");
        let parsed = parse_header(&text).expect("parse");
        prop_assert_eq!(parsed.status, code);
        prop_assert_eq!(parsed.get("ISTag"), Some("x"));
    }
}
