use chrono::Utc;
use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque, time-prefixed identifier: `<prefix>_<base36 millis><6 random>`.
pub fn uid(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..6)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{prefix}_{}{random}", to_base36(now_millis().max(0) as u64))
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
