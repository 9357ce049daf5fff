use chrono::Utc;
use sha1::{Digest, Sha1};
use std::sync::{Mutex, MutexGuard};

pub(crate) fn sha1(payload: &str) -> String {
    let hash = Sha1::digest(payload);
    base16ct::lower::encode_string(&hash)
}

pub(crate) fn unix_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn encode_digit(ch: char) -> char {
    match ch {
        '0' => 'Q',
        '1' => 'B',
        '2' => 'W',
        '3' => 'S',
        '4' => 'P',
        '5' => 'H',
        '6' => 'D',
        '7' => 'X',
        '8' => 'Z',
        '9' => 'U',
        _ => ch,
    }
}

fn encode_number(num: u64, length: usize) -> String {
    let padded = format!("000000000000{num}");
    padded[padded.len() - length..].chars().map(encode_digit).collect()
}

// Builds the obfuscated connection token carried in the streaming URL query:
// a 3-char split position, a 2-char timestamp length, and the secret split
// around the encoded connect timestamp.
pub(crate) fn build_auth_token(env_secret: &str) -> String {
    let text = env_secret.trim_end_matches('=');
    let now = unix_timestamp_millis().unsigned_abs();
    let timestamp_code = encode_number(now, now.to_string().len());
    let start = ((rand::random::<f64>() * text.len() as f64).floor() as usize)
        .max(2)
        .min(text.len());
    format!(
        "{}{}{}{}{}",
        encode_number(start as u64, 3),
        encode_number(timestamp_code.len() as u64, 2),
        &text[..start],
        timestamp_code,
        &text[start..]
    )
}
