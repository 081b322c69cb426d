//! Reading the model's verdict on "is the user done?".

/// `true` when the first word of `reply` is "yes", ignoring case and any
/// surrounding punctuation or Markdown (`Yes.`, `**YES**`, `yes, ...`).
pub fn is_affirmative(reply: &str) -> bool {
    reply
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .is_some_and(|w| w.eq_ignore_ascii_case("yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmative_forms() {
        for reply in ["Yes", "yes", "Yes.", "  YES\n", "**Yes**", "Yes, the user is done."] {
            assert!(is_affirmative(reply), "{reply:?} should be yes");
        }
    }

    #[test]
    fn negative_and_noise() {
        for reply in ["No", "No, they listed components.", "", "   ", "Yesterday", "I think yes", "[echo] Yes"] {
            assert!(!is_affirmative(reply), "{reply:?} should be no");
        }
    }
}
