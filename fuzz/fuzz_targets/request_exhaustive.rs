//! Positive-space fuzzer for session requests.
//!
//! The first input bytes pick a request kind and edge-case field values; the
//! rest is the payload. Every such request must encode, stay under the size
//! limit for small payloads, and decode back to itself.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{Nonce, PeerId, SessionRequest, SubscriptionId, codec::MAX_MESSAGE_SIZE};

const PEERS: &[&str] = &["a", "peer-1", "ü-unicode", "with space", "x"];

const NONCES: &[&str] = &["0_0", "1_1700000000", "n_18446744073709551615", "opaque_42_tail"];

const U64_EDGES: &[u64] = &[0, 1, 1_700_000_000, u32::MAX as u64, u64::MAX - 1, u64::MAX];

const SUBSCRIPTION_IDS: &[u32] = &[0, 1, u32::MAX - 1, u32::MAX];

fn pick<T: Copy>(values: &[T], selector: u8) -> T {
    values[selector as usize % values.len()]
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }

    let peer = |selector: u8| PeerId::new(pick(PEERS, selector)).expect("fixture peer is valid");
    let nonce = Nonce::parse(pick(NONCES, data[2])).expect("fixture nonce is valid");
    let flag = |bit: u8| data[4] & (1 << bit) != 0;
    let payload = bytes::Bytes::copy_from_slice(&data[5..]);

    let request = match data[0] % 10 {
        0 => SessionRequest::CheckExists,
        1 => SessionRequest::Initialise { initial_peer_id: peer(data[1]) },
        2 => SessionRequest::Subscribe { subscriber_id: peer(data[1]) },
        3 => SessionRequest::Unsubscribe { subscription_id: SubscriptionId(pick(SUBSCRIPTION_IDS, data[3])) },
        4 => SessionRequest::AddPrivilegedPeer { adder_id: peer(data[1]), added_id: peer(data[3]) },
        5 => SessionRequest::Delete { deleter_id: flag(0).then(|| peer(data[1])) },
        6 => SessionRequest::BroadcastData { data: payload, sender_id: peer(data[1]), nonce, write_history: flag(0) },
        7 => SessionRequest::UnicastData {
            data: payload,
            sender_id: peer(data[1]),
            receiver_id: peer(data[3]),
            nonce,
            write_history: flag(0),
            make_receiver_privileged: flag(1),
        },
        8 => SessionRequest::DeleteData { deleter_id: peer(data[1]), data_sender_id: peer(data[3]), data_nonce: nonce },
        _ => SessionRequest::GetHistory { reader_id: peer(data[1]), from_timestamp: pick(U64_EDGES, data[3]) },
    };

    // INVARIANT 1: encoding must succeed
    let bytes = request.encode().expect("encode should never fail for a valid request");

    // INVARIANT 2: small requests fit the decoder's limit
    if data.len() < 1024 {
        assert!(bytes.len() <= MAX_MESSAGE_SIZE, "{} byte encoding for {}", bytes.len(), request.kind());
    }

    // INVARIANT 3: round-trip must be identity
    assert_eq!(SessionRequest::decode(&bytes), Ok(request));
});
