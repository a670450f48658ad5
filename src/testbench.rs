//! Test runner: one fresh kernel and executor per test.

use prettytable::{row, Table};
use std::time;

use crate::config::TbConfig;
use crate::executor::{self, Task};
use crate::kernel::{self, Kernel};
use crate::signal::SimObject;
use crate::sim_if::SimIf;
use crate::test::{TbTests, Test, TestFn};
use crate::{junit, utils, TbError, TbResult};

/// Runs one test to completion on `sim`.
///
/// A test passes when its function returns `Ok` (or `pass_test` was called
/// first) and fails on the first error raised by any task, a phase timeout
/// or the simulated-time ceiling.
pub fn run_test(name: &str, config: &TbConfig, sim: Box<dyn SimIf>, test_fn: TestFn) -> Test {
    let mut test = Test::new(name, test_fn);
    log::info!("running test {}", name);

    utils::seed(config.seed);
    executor::clear();
    let kernel = match Kernel::new(sim, config) {
        Ok(k) => k,
        Err(e) => {
            log::error!("test {} could not start: {}", name, e);
            test.set_result(Err(e));
            return test;
        }
    };
    kernel::install(kernel);

    let time_start = time::Instant::now();
    let sim_root = SimObject::get_root();
    Task::fork(async move {
        match (test_fn)(sim_root).await {
            Ok(()) => crate::pass_test("test function returned"),
            Err(e) => crate::fail_test(e),
        }
        Ok(())
    });
    kernel::run();

    test.time_secs = time_start.elapsed().as_secs_f64();
    test.sim_time_ns = kernel::sim_time_ns();
    let result = kernel::take_result()
        .unwrap_or_else(|| Err(TbError::Failed("test ended without a result".to_string())));
    test.set_result(result);

    // tasks may own signal handles, drop them while the kernel still exists
    executor::clear();
    kernel::uninstall();
    test
}

/// Runs every test on its own simulator from `sim_factory`, logs a summary
/// table and writes a JUnit report when `config.junit_path` is set.
pub fn run_tests<F>(tests: TbTests, config: &TbConfig, mut sim_factory: F) -> TbResult<Vec<Test>>
where
    F: FnMut() -> TbResult<Box<dyn SimIf>>,
{
    let sim_start = time::Instant::now();

    let mut done = Vec::with_capacity(tests.len());
    for t in tests {
        let sim = sim_factory()?;
        done.push(run_test(&t.name, config, sim, t.generator));
    }

    log_summary(&done, sim_start.elapsed().as_secs_f64());
    if let Some(path) = &config.junit_path {
        junit::write_report(&config.suite_name, &done, path)?;
    }
    Ok(done)
}

fn log_summary(tests: &[Test], duration: f64) {
    let mut table = Table::new();
    table.add_row(row!["TEST", "RESULT", "REAL TIME (s)", "SIM TIME (ns)", "SPEED (ns/s)"]);
    let mut total_sim_ns = 0;
    for t in tests {
        let speed = t.sim_time_ns as f64 / t.time_secs.max(f64::EPSILON);
        total_sim_ns += t.sim_time_ns;
        table.add_row(row![
            t.name,
            if t.passed() { "passed" } else { "failed" },
            format!("{:.3}", t.time_secs),
            t.sim_time_ns,
            format!("{:.3}", speed)
        ]);
    }
    for line in table.to_string().lines() {
        log::info!("{}", line);
    }
    let passed = tests.iter().filter(|t| t.passed()).count();
    log::info!(
        "{}/{} tests passed, simulation time: {} ns, real time: {:.3} s",
        passed,
        tests.len(),
        total_sim_ns,
        duration
    );
}
