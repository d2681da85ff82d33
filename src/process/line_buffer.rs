//! Byte-level line splitting for child stdout.
//!
//! Chunks may end mid-line or mid-codepoint; bytes are only decoded once a
//! full line is available.

#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete, non-blank line it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Drain the trailing partial line, if it has any visible content.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.into_owned())
    }
}


#[cfg(all(test, feature = "fuzz-tests"))]
mod fuzz_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn chunking_never_changes_the_lines(
            lines in proptest::collection::vec("[a-z{}\":é✓ ]{1,20}", 0..8),
            cuts in proptest::collection::vec(0usize..200, 0..6),
        ) {
            let joined = lines.iter().map(|l| format!("{l}\n")).collect::<String>();
            let bytes = joined.as_bytes();
            let mut points = cuts.into_iter().map(|c| c.min(bytes.len())).collect::<Vec<_>>();
            points.push(0);
            points.push(bytes.len());
            points.sort_unstable();

            let mut buffer = LineBuffer::new();
            let mut seen = Vec::new();
            for window in points.windows(2) {
                seen.extend(buffer.push(&bytes[window[0]..window[1]]));
            }
            let expected = lines
                .iter()
                .filter(|l| !l.trim().is_empty())
                .cloned()
                .collect::<Vec<_>>();
            prop_assert_eq!(seen, expected);
            prop_assert_eq!(buffer.finish(), None);
        }
    }
}
