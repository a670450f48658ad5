use junit_report::{Duration, ReportBuilder, TestCaseBuilder, TestSuiteBuilder};
use std::path::Path;

use crate::test::Test;
use crate::{TbError, TbResult};

pub(crate) fn write_report(suite: &str, tests: &[Test], path: impl AsRef<Path>) -> TbResult {
    let mut test_cases = Vec::new();

    for t in tests.iter() {
        let duration = Duration::seconds_f64(t.time_secs);
        let tc = match t.result.as_ref() {
            Some(Ok(_)) => TestCaseBuilder::success(&t.name, duration),
            Some(Err(e)) => {
                let kind = if e.is_hang() { "timeout" } else { "failure" };
                TestCaseBuilder::failure(&t.name, duration, kind, &e.to_string())
            }
            None => TestCaseBuilder::failure(&t.name, duration, "failure", "not run"),
        }
        .build();
        test_cases.push(tc);
    }

    let test_suite = TestSuiteBuilder::new(suite).add_testcases(test_cases).build();
    let report = ReportBuilder::new().add_testsuite(test_suite).build();
    let file = std::fs::File::create(path.as_ref())?;
    report
        .write_xml(file)
        .map_err(|e| TbError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
    log::info!("JUnit report written to {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SimObject;
    use futures::FutureExt;

    async fn nothing(_dut: SimObject) -> TbResult {
        Ok(())
    }

    #[test]
    fn report_lists_failures() {
        let mut ok = Test::new("ok", |d| nothing(d).boxed_local());
        ok.set_result(Ok("done".into()));
        let mut bad = Test::new("bad", |d| nothing(d).boxed_local());
        bad.set_result(Err(TbError::Stalled { time_ns: 40 }));

        let path = std::env::temp_dir().join(format!("busverif_junit_{}.xml", std::process::id()));
        write_report("suite", &[ok, bad], &path).unwrap();
        let xml = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(xml.contains("testsuite"));
        assert!(xml.contains("name=\"bad\""));
        assert!(xml.contains("timeout"));
    }
}
