/// Incremental parser for `text/event-stream` bodies.
///
/// Bytes may arrive split at arbitrary points, including inside a UTF-8
/// sequence, so the buffer holds raw bytes and only complete frames are
/// decoded. Carriage returns are dropped, which folds `\r\n` line endings
/// into `\n`.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed bytes and drain the `data` payloads of every complete frame.
    ///
    /// Frames without data lines (comments, keep-alives) and `[DONE]`
    /// sentinels are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer
            .extend(bytes.iter().copied().filter(|byte| *byte != b'\r'));

        let mut payloads = Vec::new();
        while let Some(split) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            let frame = String::from_utf8_lossy(&frame[..split]);
            if let Some(payload) = extract_data_payload(&frame) {
                if payload != "[DONE]" {
                    payloads.push(payload);
                }
            }
        }
        payloads
    }

    /// Drain the frame left in the buffer once the body has ended.
    ///
    /// Servers may close the stream without the blank line that terminates
    /// the final frame; that frame still counts.
    pub fn finish(&mut self) -> Option<String> {
        if self.is_empty_buffer() {
            self.buffer.clear();
            return None;
        }
        let frame = std::mem::take(&mut self.buffer);
        extract_data_payload(&String::from_utf8_lossy(&frame))
            .filter(|payload| payload != "[DONE]")
    }

    fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(|byte| byte.is_ascii_whitespace())
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    let payload = data_lines.join("\n");
    if payload.trim().is_empty() {
        None
    } else {
        Some(payload)
    }
}
