//! Production environment.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::{RngCore, rngs::OsRng};
use tether_core::{Environment, Timestamp};

/// System clock, tokio timers and the OS entropy pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Timestamp {
        // A clock set before 1970 reads as the epoch
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Timestamp::from_millis(millis)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(SystemEnv.now() > Timestamp::from_secs(1_577_836_800));
    }

    #[test]
    fn random_bytes_vary() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        SystemEnv.random_bytes(&mut a);
        SystemEnv.random_bytes(&mut b);
        assert_ne!(a, b);
    }
}
