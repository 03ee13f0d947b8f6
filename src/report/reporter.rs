//! Rendering of structured test results in the device line format

use std::io::{self, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a result belongs to a suite or to a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Suite,
    Case,
}

/// Final state of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Ignored,
    Inconclusive,
    /// Anything else the framework reports (e.g. a suite that did not run)
    Info,
}

impl TestStatus {
    /// Marker written in front of case names
    pub fn marker(self) -> &'static str {
        match self {
            Self::Passed => "[PASS]",
            Self::Failed => "[FAIL]",
            Self::Ignored => "[IGNORED]",
            Self::Inconclusive => "[INCONCLUSIVE]",
            Self::Info => "[INFO]",
        }
    }
}

/// A finished test, as reported by the test framework
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub kind: TestKind,
    pub status: TestStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default, with = "duration_secs")]
    pub duration: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Receiver of test lifecycle events
pub trait TestReporter {
    fn test_started(&mut self, name: &str, kind: TestKind) -> io::Result<()>;
    fn test_finished(&mut self, outcome: &TestOutcome) -> io::Result<()>;
}

/// Writes results as plain text lines and counts case outcomes
pub struct DefaultTestReporter<W: Write> {
    writer: W,
    pub passed: u32,
    pub failed: u32,
    pub ignored: u32,
    pub inconclusive: u32,
}

impl<W: Write> DefaultTestReporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            passed: 0,
            failed: 0,
            ignored: 0,
            inconclusive: 0,
        }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn finish_suite(&mut self, outcome: &TestOutcome) -> io::Result<()> {
        if outcome.status == TestStatus::Info {
            writeln!(
                self.writer,
                "\t[INFO] {}",
                outcome.message.as_deref().unwrap_or_default()
            )?;
        }
        if !outcome.name.is_empty() {
            writeln!(
                self.writer,
                "{} : {} ms",
                outcome.name,
                outcome.duration.as_secs_f64() * 1000.0
            )?;
        }
        Ok(())
    }

    fn finish_case(&mut self, outcome: &TestOutcome) -> io::Result<()> {
        match outcome.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Ignored => self.ignored += 1,
            TestStatus::Inconclusive => self.inconclusive += 1,
            TestStatus::Info => {}
        }

        write!(self.writer, "\t{} {}", outcome.status.marker(), outcome.name)?;
        if let Some(message) = outcome.message.as_deref().filter(|m| !m.is_empty()) {
            write!(self.writer, " : {}", message.replace("\r\n", "\\r\\n"))?;
        }
        writeln!(self.writer)?;

        if let Some(trace) = outcome.stack_trace.as_deref() {
            for line in trace.split(['\r', '\n']).filter(|l| !l.is_empty()) {
                writeln!(self.writer, "\t\t{line}")?;
            }
        }
        Ok(())
    }
}

impl<W: Write> TestReporter for DefaultTestReporter<W> {
    fn test_started(&mut self, name: &str, kind: TestKind) -> io::Result<()> {
        if kind == TestKind::Suite {
            writeln!(self.writer)?;
            writeln!(self.writer, "{name}")?;
        }
        Ok(())
    }

    fn test_finished(&mut self, outcome: &TestOutcome) -> io::Result<()> {
        match outcome.kind {
            TestKind::Suite => self.finish_suite(outcome),
            TestKind::Case => self.finish_case(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(name: &str, status: TestStatus) -> TestOutcome {
        TestOutcome {
            name: name.to_string(),
            kind: TestKind::Case,
            status,
            message: None,
            stack_trace: None,
            duration: Duration::ZERO,
        }
    }

    fn render(events: impl FnOnce(&mut DefaultTestReporter<Vec<u8>>)) -> (String, [u32; 4]) {
        let mut reporter = DefaultTestReporter::new(Vec::new());
        events(&mut reporter);
        let counts = [
            reporter.passed,
            reporter.failed,
            reporter.ignored,
            reporter.inconclusive,
        ];
        (String::from_utf8(reporter.into_inner()).unwrap(), counts)
    }

    #[test]
    fn test_suite_header_and_footer() {
        let (text, _) = render(|r| {
            r.test_started("MathTests", TestKind::Suite).unwrap();
            r.test_started("Adds", TestKind::Case).unwrap();
            r.test_finished(&TestOutcome {
                kind: TestKind::Suite,
                duration: Duration::from_millis(250),
                ..case("MathTests", TestStatus::Passed)
            })
            .unwrap();
        });
        assert_eq!(text, "\nMathTests\nMathTests : 250 ms\n");
    }

    #[test]
    fn test_case_lines_and_counters() {
        let (text, counts) = render(|r| {
            r.test_finished(&case("Adds", TestStatus::Passed)).unwrap();
            r.test_finished(&case("Skipped", TestStatus::Ignored)).unwrap();
            r.test_finished(&case("Maybe", TestStatus::Inconclusive)).unwrap();
        });
        assert_eq!(text, "\t[PASS] Adds\n\t[IGNORED] Skipped\n\t[INCONCLUSIVE] Maybe\n");
        assert_eq!(counts, [1, 0, 1, 1]);
    }

    #[test]
    fn test_failure_message_and_stack_trace() {
        let (text, counts) = render(|r| {
            r.test_finished(&TestOutcome {
                message: Some("expected 2\r\nbut was 3".into()),
                stack_trace: Some("at Foo.Bar()\r\n\r\nat Foo.Baz()".into()),
                ..case("Divides", TestStatus::Failed)
            })
            .unwrap();
        });
        assert_eq!(
            text,
            "\t[FAIL] Divides : expected 2\\r\\nbut was 3\n\t\tat Foo.Bar()\n\t\tat Foo.Baz()\n"
        );
        assert_eq!(counts, [0, 1, 0, 0]);
    }

    #[test]
    fn test_suite_info_message() {
        let (text, _) = render(|r| {
            r.test_finished(&TestOutcome {
                kind: TestKind::Suite,
                message: Some("not run".into()),
                ..case("", TestStatus::Info)
            })
            .unwrap();
        });
        assert_eq!(text, "\t[INFO] not run\n");
    }

    #[test]
    fn test_outcome_from_json() {
        let outcome: TestOutcome = serde_json::from_str(
            r#"{"name":"Adds","kind":"case","status":"passed","duration":0.5}"#,
        )
        .unwrap();
        assert_eq!(outcome.status, TestStatus::Passed);
        assert_eq!(outcome.duration, Duration::from_millis(500));
        assert!(outcome.message.is_none());
    }
}
