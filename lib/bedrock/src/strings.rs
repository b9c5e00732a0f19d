use arrayvec::ArrayString;

/// Fixed-capacity storage for short wire fields with hard client-side
/// limits (animation library names, animation names).
pub type SmallName = ArrayString<32>;

/// Builds a `SmallName`, truncating at the capacity boundary. Clients
/// truncate over-long names identically, so nothing is lost on the wire.
pub fn small_name(text: &str) -> SmallName {
    let mut out = SmallName::new();
    for ch in text.chars() {
        if out.try_push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_kept() {
        assert_eq!(small_name("PED").as_str(), "PED");
    }

    #[test]
    fn test_long_name_truncated() {
        let long = "A".repeat(100);
        let name = small_name(&long);
        assert_eq!(name.len(), 32);
    }
}
