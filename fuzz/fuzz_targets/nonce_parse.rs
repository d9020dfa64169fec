//! Nonce parsing on arbitrary strings.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{Nonce, NonceRecord};

fuzz_target!(|raw: &str| {
    let Ok(nonce) = Nonce::parse(raw) else {
        return;
    };

    // INVARIANT 1: the token is kept verbatim
    assert_eq!(nonce.as_str(), raw);

    // INVARIANT 2: a signed-request pair rebuilds to an equal timestamp
    if let Some(record) = nonce.record() {
        let rebuilt = Nonce::from_record(record);
        assert_eq!(rebuilt.timestamp(), nonce.timestamp());
        assert_eq!(rebuilt.record(), Some(record));
    }

    // INVARIANT 3: freshness never panics at the edges of time
    for now in [0, nonce.timestamp(), u64::MAX] {
        let _ = nonce.is_fresh(now);
    }

    let _ = NonceRecord { id: 0, timestamp: nonce.timestamp() };
});
