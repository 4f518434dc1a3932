use chrono::{DateTime, Utc};
use rand::Rng;

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `ORD-<base36 epoch millis>-<4 random base36 chars>`.
///
/// Uniqueness is probabilistic (collisions need the same millisecond and the
/// same 1-in-1.6M suffix); the store's unique index on order numbers is the
/// actual guarantee.
pub fn generate_order_number<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let millis = now.timestamp_millis().max(0) as u64;
    let suffix: String = (0..4)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("ORD-{}-{}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "LOYW3V28");
    }

    #[test]
    fn order_number_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let number = generate_order_number(now, &mut rng);

        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1], "LOYW3V28");
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn consecutive_numbers_differ() {
        let now = Utc::now();
        let mut rng = rand::thread_rng();
        let a = generate_order_number(now, &mut rng);
        let b = generate_order_number(now, &mut rng);
        let c = generate_order_number(now, &mut rng);
        assert!(a != b || b != c);
    }
}
