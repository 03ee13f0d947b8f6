//! Counting test outcomes in relayed device output

use serde::Serialize;

use super::reporter::TestStatus;

/// Longest partial line carried between chunks
const MAX_PENDING: usize = 64 * 1024;

/// Running count of result markers seen in a byte stream
///
/// Chunks arrive at arbitrary boundaries, so an unterminated trailing line is
/// held back until the next chunk (or [`finish`](Self::finish)) completes it.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ResultTally {
    pub passed: u32,
    pub failed: u32,
    pub ignored: u32,
    pub inconclusive: u32,
    /// Names of failed cases in the order they were reported
    pub failures: Vec<String>,
    #[serde(skip)]
    pending: Vec<u8>,
}

impl ResultTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of relayed bytes
    pub fn feed(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            if self.pending.is_empty() {
                self.consume_line(head);
            } else {
                let mut line = std::mem::take(&mut self.pending);
                line.extend_from_slice(head);
                self.consume_line(&line);
            }
            rest = &tail[1..];
        }

        if self.pending.len() + rest.len() > MAX_PENDING {
            // Binary or runaway output; nothing in it is a marker line.
            self.pending.clear();
        } else {
            self.pending.extend_from_slice(rest);
        }
    }

    /// Count a final unterminated line, if any
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.consume_line(&line);
        }
    }

    /// Total number of cases that reported a terminal status
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.ignored + self.inconclusive
    }

    fn consume_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_start().trim_end_matches('\r');

        let Some((status, rest)) = parse_marker(line) else {
            return;
        };
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => {
                self.failed += 1;
                let name = rest.split(" : ").next().unwrap_or(rest).trim();
                self.failures.push(name.to_string());
            }
            TestStatus::Ignored => self.ignored += 1,
            TestStatus::Inconclusive => self.inconclusive += 1,
            TestStatus::Info => {}
        }
    }
}

fn parse_marker(line: &str) -> Option<(TestStatus, &str)> {
    [
        TestStatus::Passed,
        TestStatus::Failed,
        TestStatus::Ignored,
        TestStatus::Inconclusive,
    ]
    .into_iter()
    .find_map(|status| {
        line.strip_prefix(status.marker())
            .map(|rest| (status, rest.trim_start()))
    })
}
