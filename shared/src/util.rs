/// Render bytes for a log line, truncated to `max_len`.
///
/// Non-UTF8 input is lossily converted; empty input renders as `<empty>`.
pub fn truncate_bytes(data: &[u8], max_len: usize) -> String {
    if data.is_empty() {
        return "<empty>".to_string();
    }
    if data.len() <= max_len {
        return String::from_utf8_lossy(data).into_owned();
    }
    format!("{}...(truncated)", String::from_utf8_lossy(&data[..max_len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_bytes() {
        assert_eq!(truncate_bytes(b"", 10), "<empty>");
        assert_eq!(truncate_bytes(b"hello", 10), "hello");
        assert_eq!(truncate_bytes(b"hello world", 5), "hello...(truncated)");
    }
}
