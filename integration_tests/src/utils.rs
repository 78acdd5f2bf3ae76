#![allow(dead_code)]
use std::sync::Arc;

use mcs_client::{mcs_common::names::describe, Mcs, McsConfig, RegisterMode};

use crate::sim_bus::SimBus;

pub fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Build an `Mcs` on `sim` from `config` and open it with `mode`
pub fn open_mcs(sim: &Arc<SimBus>, config: &McsConfig, mode: RegisterMode) -> Mcs {
    init_logging();
    let mcs = Mcs::from_config(config, sim.clone()).expect("Invalid config");
    mcs.open(mode).expect("Failed to open");
    mcs
}

/// Prints the bus trace when dropped, so a failing test shows the traffic
pub struct TraceLogger {
    sim: Arc<SimBus>,
}

impl TraceLogger {
    pub fn new(sim: &Arc<SimBus>) -> Self {
        Self { sim: sim.clone() }
    }

    pub fn print(&self) {
        println!("Bus message history");
        println!("-------------------");
        for msg in self.sim.trace() {
            println!("{}", describe(&msg));
        }
    }
}

impl Drop for TraceLogger {
    fn drop(&mut self) {
        self.print();
    }
}
