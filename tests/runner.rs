mod common;

use std::cell::RefCell;
use std::rc::Rc;

use busverif::config::TbConfig;
use busverif::prelude::*;
use busverif::sim_if::SimIf;
use busverif::testbench::{run_test, run_tests};
use busverif::{tb_tests, Event};
use common::*;

struct Idle {
    name: String,
}

impl Infrastructure for Idle {
    fn name(&self) -> &str {
        &self.name
    }
    fn has_enough_sim(&self) -> bool {
        false
    }
}

fn dut() -> Box<dyn SimIf> {
    Box::new(clocked())
}

async fn waits_forever(_dut: SimObject) -> TbResult {
    let never: Event<()> = Event::new();
    never.wait().await;
    Ok(())
}

#[test]
fn nothing_scheduled_is_a_stall() {
    init_logger();
    let t = run_test("waits_forever", &TbConfig::default(), dut(), |d| {
        waits_forever(d).boxed_local()
    });
    assert!(matches!(t.result, Some(Err(TbError::Stalled { time_ns: 0 }))), "{:?}", t.result);
}

async fn clock_only(dut: SimObject) -> TbResult {
    let cd = start_clock(dut);
    loop {
        cd.clk.rising_edge().await;
    }
}

#[test]
fn simulated_time_is_bounded() {
    init_logger();
    let config = TbConfig {
        max_sim_time_ns: 1_000,
        ..TbConfig::default()
    };
    let t = run_test("clock_only", &config, dut(), |d| clock_only(d).boxed_local());
    match t.result {
        Some(Err(e @ TbError::SimTimeLimit { .. })) => assert!(e.is_hang()),
        other => panic!("expected the time limit, got {:?}", other),
    }
    assert!(t.sim_time_ns <= 1_000);
}

async fn never_enough(dut: SimObject) -> TbResult {
    start_clock(dut);
    let mut pm = PhaseManager::new();
    pm.set_phase_timeout(Some(500));
    pm.add_child(Rc::new(RefCell::new(Idle {
        name: "lazyAgent".into(),
    })));
    pm.run().await
}

#[test]
fn phase_timeout_names_the_blocking_node() {
    init_logger();
    let t = run_test("never_enough", &TbConfig::default(), dut(), |d| {
        never_enough(d).boxed_local()
    });
    match t.result {
        Some(Err(TbError::Timeout { phase, blocking, .. })) => {
            assert_eq!(phase, Phase::Sim);
            assert_eq!(blocking, "lazyAgent");
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
}

async fn passes_early(dut: SimObject) -> TbResult {
    let cd = start_clock(dut);
    clock_cycles(cd.clk, 3).await?;
    pass_test("enough");
    fail_test(TbError::Failed("too late".into()));
    clock_cycles(cd.clk, 3).await
}

async fn fails_from_a_task(dut: SimObject) -> TbResult {
    let cd = start_clock(dut);
    Task::fork(async move {
        clock_cycles(cd.clk, 2).await?;
        Err(TbError::Failed("child task".into()))
    });
    clock_cycles(cd.clk, 100).await
}

#[test]
fn first_result_wins_and_suite_reports() {
    init_logger();
    let junit = std::env::temp_dir().join(format!("busverif_runner_{}.xml", std::process::id()));
    let config = TbConfig {
        junit_path: Some(junit.to_string_lossy().into_owned()),
        ..TbConfig::default()
    };
    let tests = tb_tests![passes_early, fails_from_a_task];
    assert_eq!(tests.len(), 2);
    let done = run_tests(tests, &config, || Ok(dut())).unwrap();

    assert_eq!(done[0].result, Some(Ok("enough".to_string())));
    assert_eq!(done[1].result, Some(Err(TbError::Failed("child task".into()))));
    let xml = std::fs::read_to_string(&junit).unwrap();
    let _ = std::fs::remove_file(&junit);
    assert!(xml.contains("passes_early"));
    assert!(xml.contains("fails_from_a_task"));
}

#[test]
fn every_suite_reports_under_its_own_name() {
    init_logger();
    let junit = std::env::temp_dir().join(format!("busverif_suites_{}.xml", std::process::id()));
    for suite in ["first_suite", "second_suite"] {
        let config = TbConfig {
            suite_name: suite.to_string(),
            junit_path: Some(junit.to_string_lossy().into_owned()),
            ..TbConfig::default()
        };
        run_tests(tb_tests![passes_early], &config, || Ok(dut())).unwrap();
        let xml = std::fs::read_to_string(&junit).unwrap();
        assert!(xml.contains(suite), "{}", xml);
    }
    let _ = std::fs::remove_file(&junit);
}

#[test]
fn same_seed_same_run() {
    init_logger();
    async fn sample(dut: SimObject) -> TbResult {
        let cd = start_clock(dut);
        clock_cycles(cd.clk, 1).await?;
        pass_test(&format!("{}", busverif::utils::rand_int(1 << 32)));
        Ok(())
    }
    let config = TbConfig {
        seed: 77,
        ..TbConfig::default()
    };
    let a = run_test("a", &config, dut(), |d| sample(d).boxed_local());
    let b = run_test("b", &config, dut(), |d| sample(d).boxed_local());
    assert!(a.passed());
    assert_eq!(a.result, b.result);
}
