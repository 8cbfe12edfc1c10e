use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng, TryRngCore};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a client-side batch identifier (version-4 UUID).
///
/// The backend uses it as the batch primary key. Randomness comes from the
/// operating system when it is available; otherwise a time-seeded `StdRng`
/// produces an id of the same shape.
pub fn new_batch_id() -> String {
    let mut bytes = [0u8; 16];
    if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
        log::warn!("OS random source unavailable ({}), using seeded fallback", e);
        return fallback_batch_id(&mut StdRng::seed_from_u64(time_seed()));
    }
    uuid_from_bytes(bytes)
}

/// Build a v4 UUID from an arbitrary RNG.
pub fn fallback_batch_id<R: Rng>(rng: &mut R) -> String {
    let bytes: [u8; 16] = rng.random();
    uuid_from_bytes(bytes)
}

fn uuid_from_bytes(bytes: [u8; 16]) -> String {
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}

/// Whether `id` parses as a version-4 UUID.
pub fn is_v4(id: &str) -> bool {
    Uuid::parse_str(id)
        .map(|u| u.get_version_num() == 4)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_is_v4() {
        let id = new_batch_id();
        assert_eq!(id.len(), 36);
        assert!(is_v4(&id));
    }

    #[test]
    fn test_batch_ids_are_unique() {
        assert_ne!(new_batch_id(), new_batch_id());
    }

    #[test]
    fn test_fallback_has_same_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = fallback_batch_id(&mut rng);
        assert!(is_v4(&id));
        assert_eq!(&id[14..15], "4");
        assert!(matches!(&id[19..20], "8" | "9" | "a" | "b"));
    }

    #[test]
    fn test_fallback_is_deterministic_per_seed() {
        let a = fallback_batch_id(&mut StdRng::seed_from_u64(42));
        let b = fallback_batch_id(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_v4_rejects_garbage() {
        assert!(!is_v4("not-a-uuid"));
        assert!(!is_v4("00000000-0000-1000-8000-000000000000"));
    }
}
