pub const MAX_STREAM_BYTES: usize = 128 * 1024;

/// Lossy UTF-8 view of the last `MAX_STREAM_BYTES` of a stream; `None` when blank.
pub fn normalize_stream(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    let normalized = if bytes.len() > MAX_STREAM_BYTES {
        &bytes[(bytes.len() - MAX_STREAM_BYTES)..]
    } else {
        bytes
    };

    let text = String::from_utf8_lossy(normalized).to_string();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn stream_lines(text: Option<&str>) -> Vec<String> {
    text.map(|text| {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{MAX_STREAM_BYTES, normalize_stream, stream_lines};

    #[test]
    fn output_is_truncated_to_tail_window() {
        let mut input = vec![b'a'; MAX_STREAM_BYTES + 32];
        input.extend_from_slice(b"tail");

        let text = normalize_stream(&input).expect("expected text");
        assert_eq!(text.len(), MAX_STREAM_BYTES);
        assert!(text.ends_with("tail"));
    }

    #[test]
    fn blank_output_is_dropped() {
        assert_eq!(normalize_stream(b""), None);
        assert_eq!(normalize_stream(b" \n\t"), None);
    }

    #[test]
    fn lines_skip_blank_entries() {
        assert_eq!(
            stream_lines(Some("compiled 3 models\n\nwarn: stale\n")),
            vec!["compiled 3 models".to_string(), "warn: stale".to_string()]
        );
        assert!(stream_lines(None).is_empty());
    }
}
