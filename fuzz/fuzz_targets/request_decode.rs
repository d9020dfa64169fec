//! Arbitrary bytes into every wire decoder.
//!
//! Decoding must never panic. Whatever decodes must survive a second trip
//! through the encoder unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{ChannelMessage, GuardRequest, SessionRequest, SessionResponse};

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = SessionRequest::decode(data) {
        let bytes = request.encode().expect("decoded request must re-encode");
        assert_eq!(SessionRequest::decode(&bytes), Ok(request));
    }

    if let Ok(request) = GuardRequest::decode(data) {
        let bytes = request.encode().expect("decoded guard request must re-encode");
        assert_eq!(GuardRequest::decode(&bytes), Ok(request));
    }

    if let Ok(response) = SessionResponse::decode(data) {
        let bytes = response.encode().expect("decoded response must re-encode");
        assert_eq!(SessionResponse::decode(&bytes), Ok(response));
    }

    if let Ok(message) = ChannelMessage::decode(data) {
        let bytes = message.encode().expect("decoded channel message must re-encode");
        assert_eq!(ChannelMessage::decode(&bytes), Ok(message));
    }
});
