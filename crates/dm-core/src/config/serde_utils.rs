//! Serde helpers for configuration and plan files

/// `Duration` as whole seconds
///
/// Used for the `[update]` timeouts in `config.toml` and for the waits in
/// the self-update plan, so both files read `check_timeout = 10` rather
/// than a nested `{ secs, nanos }` table. Sub-second parts are dropped.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
