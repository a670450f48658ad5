mod common;

use std::rc::Rc;

use busverif::ahb::{
    AhbLite3, AhbLite3MasterDriver, AhbLite3MasterReadChecker, AhbLite3SlaveMemory,
    AhbLite3TrafficGenerator, AhbLite3TrafficGeneratorWithMemory, ReadBuffer,
};
use busverif::config::TbConfig;
use busverif::prelude::*;
use busverif::testbench::run_test;
use common::*;

async fn master_to_memory(dut: SimObject) -> TbResult {
    let cd = start_clock(dut);
    let ahb = AhbLite3::new(dut, "ahb")?;
    // single slave: selected all the time, its HREADYOUT is the bus HREADY
    dut.c("ahb_HSEL").set(1);
    wire(dut.c("ahb_HREADYOUT"), dut.c("ahb_HREADY"));

    let buffer: ReadBuffer = Rc::default();
    let generator = AhbLite3TrafficGeneratorWithMemory::new(
        AhbLite3TrafficGenerator::new(12, 32),
        buffer.clone(),
    );
    let driver = AhbLite3MasterDriver::start(&ahb, generator, cd);
    let checker = AhbLite3MasterReadChecker::start(&ahb, buffer, cd);
    checker.borrow_mut().set_target(100);
    let memory = AhbLite3SlaveMemory::start(&ahb, 0x000, 0x1000, cd)?;

    let mut pm = PhaseManager::new();
    pm.set_wait_tasks_end_time(500);
    pm.add_child(driver);
    pm.add_child(checker.clone());
    pm.add_child(memory);
    pm.run().await?;

    if checker.borrow().reads() < 100 {
        return Err(TbError::Failed("too few checked reads".into()));
    }
    Ok(())
}

#[test]
fn reads_return_what_was_written() {
    init_logger();
    let mut rf = clocked();
    add_ahb(&mut rf, "ahb");
    let t = run_test("master_to_memory", &TbConfig::default(), Box::new(rf), |d| {
        master_to_memory(d).boxed_local()
    });
    assert!(t.passed(), "{:?}", t.result);
}

async fn out_of_window(dut: SimObject) -> TbResult {
    let cd = start_clock(dut);
    let ahb = AhbLite3::new(dut, "ahb")?;
    dut.c("ahb_HSEL").set(1);
    wire(dut.c("ahb_HREADYOUT"), dut.c("ahb_HREADY"));

    // the memory only covers the upper half of what the master addresses
    let generator = AhbLite3TrafficGenerator::new(12, 32);
    AhbLite3MasterDriver::start(&ahb, generator, cd);
    AhbLite3SlaveMemory::start(&ahb, 0x800, 0x800, cd)?;
    clock_cycles(cd.clk, 5000).await
}

#[test]
fn slave_rejects_addresses_outside_its_window() {
    init_logger();
    let mut rf = clocked();
    add_ahb(&mut rf, "ahb");
    let t = run_test("out_of_window", &TbConfig::default(), Box::new(rf), |d| {
        out_of_window(d).boxed_local()
    });
    match t.result {
        Some(Err(TbError::ProtocolViolation(msg))) => assert!(msg.starts_with("WRONG ADDRESS")),
        other => panic!("expected a protocol violation, got {:?}", other),
    }
}
