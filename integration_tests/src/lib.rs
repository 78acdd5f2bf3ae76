pub mod sim_bus;
pub mod utils;

pub mod prelude {
    pub use super::sim_bus::{SimAxis, SimBus, SimModule};
    pub use super::utils::{init_logging, open_mcs, TraceLogger};
    pub use mcs_client::{
        mcs_common::constants::{opcodes, reset_mask},
        tml::{DriveMode, MoveCommand, MoveOutcome, StopMode, WaitOutcome},
        Device, Mcs, McsConfig, McsError, RegisterMode, Status, Wait,
    };
}
