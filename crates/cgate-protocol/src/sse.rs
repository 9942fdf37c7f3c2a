use bytes::Bytes;

/// Incremental parser for the upstream `text/event-stream` body.
///
/// The upstream stream carries one event per `data:` line; blank lines,
/// comment lines and other SSE fields are separators or noise and are
/// skipped. Bytes are buffered so a UTF-8 sequence or a line split across
/// two network chunks still decodes as one payload.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk and returns the `data:` payloads of every
    /// line completed by it.
    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line[..line.len() - 1]) {
                payloads.push(payload);
            }
        }

        payloads
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.push_bytes(&Bytes::copy_from_slice(chunk.as_bytes()))
    }

    /// Flushes a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    };
    if line.is_empty() || line.starts_with(b":") {
        return None;
    }
    let value = line.strip_prefix(b"data:")?;
    let text = String::from_utf8_lossy(value);
    Some(text.trim_start().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_lines() {
        let mut parser = SseParser::new();
        let payloads = parser.push_str("data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: {\"delta\":").is_empty());
        let payloads = parser.push_str("\"hi\"}\n");
        assert_eq!(payloads, vec!["{\"delta\":\"hi\"}".to_string()]);
    }

    #[test]
    fn reassembles_utf8_split_across_chunks() {
        let mut parser = SseParser::new();
        let line = "data: {\"delta\":\"你好\"}\n".as_bytes();
        let (head, tail) = line.split_at(17); // splits inside the first multibyte char
        assert!(parser.push_bytes(&Bytes::copy_from_slice(head)).is_empty());
        let payloads = parser.push_bytes(&Bytes::copy_from_slice(tail));
        assert_eq!(payloads, vec!["{\"delta\":\"你好\"}".to_string()]);
    }

    #[test]
    fn skips_noise_lines() {
        let mut parser = SseParser::new();
        let payloads =
            parser.push_str(": keep-alive\nevent: message\nretry: 100\n\r\ndata: x\r\n");
        assert_eq!(payloads, vec!["x".to_string()]);
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        assert_eq!(parser.finish(), Some("tail".to_string()));
        assert_eq!(parser.finish(), None);
    }
}
