//! POSIX shell quoting for remote command lines

/// Quote `value` so a POSIX shell reads it as one literal word.
///
/// Plain words made of safe characters are returned unchanged.
pub fn quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
