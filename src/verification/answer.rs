/// Reduce an answer to lowercase ASCII letters and digits
pub fn normalize_answer(answer: &str) -> String {
    answer
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whether a reply matches any acceptable answer after normalization.
/// A reply that normalizes to nothing never matches.
pub fn answer_matches(reply: &str, accepted: &[String]) -> bool {
    let reply = normalize_answer(reply);
    if reply.is_empty() {
        return false;
    }
    accepted.iter().any(|a| normalize_answer(a) == reply)
}
