//! Heuristics for failures that arrive without a classification.

use std::any::Any;

use super::publisher::ErrorKind;

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

const NETWORK_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection closed",
    "connection aborted",
    "broken pipe",
    "network is unreachable",
    "host unreachable",
    "dns error",
    "failed to lookup address",
    "temporarily unavailable",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "unexpected eof",
];

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "throttl"];

/// The transient kind a message looks like, if any.
pub fn looks_transient(message: &str) -> Option<ErrorKind> {
    let lower = message.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(RATE_LIMIT_MARKERS) {
        Some(ErrorKind::RateLimited)
    } else if has(TIMEOUT_MARKERS) {
        Some(ErrorKind::Timeout)
    } else if has(NETWORK_MARKERS) {
        Some(ErrorKind::Network)
    } else {
        None
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_transient() {
        assert_eq!(looks_transient("Request Timed Out"), Some(ErrorKind::Timeout));
        assert_eq!(
            looks_transient("error sending request: connection reset by peer"),
            Some(ErrorKind::Network)
        );
        assert_eq!(
            looks_transient("Too Many Requests"),
            Some(ErrorKind::RateLimited)
        );
        assert_eq!(looks_transient("invalid media id"), None);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }
}
