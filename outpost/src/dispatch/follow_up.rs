use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "followup:";

/// Idempotency key for a follow-up job.
///
/// Derived only from stable inputs, so dispatching the same parent twice
/// collapses onto one child.
pub fn follow_up_key(
    parent_channel: &str,
    parent_key: &str,
    follow_up_channel: &str,
    discriminator: &str,
) -> String {
    let mut hasher = Sha256::new();
    // Length-prefixed so that no two distinct tuples share an encoding.
    for part in [parent_channel, parent_key, follow_up_channel, discriminator] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable() {
        let a = follow_up_key("meta_facebook", "post-1", "meta_comment", "first");
        let b = follow_up_key("meta_facebook", "post-1", "meta_comment", "first");
        assert_eq!(a, b);
        assert!(a.starts_with("followup:"));
        assert_eq!(a.len(), "followup:".len() + 64);
    }

    #[test]
    fn test_key_depends_on_every_input() {
        let base = follow_up_key("a", "b", "c", "d");
        assert_ne!(base, follow_up_key("x", "b", "c", "d"));
        assert_ne!(base, follow_up_key("a", "x", "c", "d"));
        assert_ne!(base, follow_up_key("a", "b", "x", "d"));
        assert_ne!(base, follow_up_key("a", "b", "c", "x"));
    }

    #[test]
    fn test_separators_inside_parts_do_not_collide() {
        assert_ne!(
            follow_up_key("a|b", "c", "d", "e"),
            follow_up_key("a", "b|c", "d", "e")
        );
        assert_ne!(
            follow_up_key("ab", "", "c", "d"),
            follow_up_key("a", "b", "c", "d")
        );
    }

    #[test]
    fn test_known_digest() {
        let mut encoded = Vec::new();
        for part in ["a", "bc", "", "d"] {
            encoded.extend_from_slice(&(part.len() as u64).to_le_bytes());
            encoded.extend_from_slice(part.as_bytes());
        }
        let expected = format!("followup:{}", hex::encode(Sha256::digest(&encoded)));
        assert_eq!(follow_up_key("a", "bc", "", "d"), expected);
    }
}
