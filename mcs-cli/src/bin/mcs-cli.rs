use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;

use mcs_client::{
    mcs_common::{
        constants::DEFAULT_WAIT_TIMEOUT,
        tml::{mer_description, sr32_description},
        SocketCanTransport,
    },
    Mcs, McsConfig, RegisterMode, Wait,
};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to MCS modules on a CAN bus")]
struct Args {
    /// CAN interface, e.g. can0
    interface: String,
    /// Stack configuration (names, error texts, catalogue)
    #[clap(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the modules that answer
    Scan,
    /// Show firmware, hardware and status of a module
    Info {
        #[clap(value_parser=maybe_hex::<u16>)]
        address: u16,
    },
    /// Reset a module
    Reset {
        #[clap(value_parser=maybe_hex::<u16>)]
        address: u16,
        #[clap(long, default_value = "0xff", value_parser=maybe_hex::<u8>)]
        mask: u8,
    },
    /// Initialize a module
    Init {
        #[clap(value_parser=maybe_hex::<u16>)]
        address: u16,
        #[clap(long, default_value = "0", value_parser=maybe_hex::<u8>)]
        mode: u8,
    },
    /// Read a port
    GetPort {
        #[clap(value_parser=maybe_hex::<u16>)]
        address: u16,
        #[clap(value_parser=maybe_hex::<u8>)]
        port: u8,
        #[clap(long)]
        signed: bool,
    },
    /// Write a port
    SetPort {
        #[clap(value_parser=maybe_hex::<u16>)]
        address: u16,
        #[clap(value_parser=maybe_hex::<u8>)]
        port: u8,
        #[clap(allow_negative_numbers = true)]
        value: i64,
        #[clap(long, default_value = "4")]
        length: u8,
    },
    /// Read a parameter
    GetParam {
        #[clap(value_parser=maybe_hex::<u16>)]
        address: u16,
        #[clap(value_parser=maybe_hex::<u8>)]
        parameter: u8,
        #[clap(long)]
        signed: bool,
    },
    /// Write a parameter
    SetParam {
        #[clap(value_parser=maybe_hex::<u16>)]
        address: u16,
        #[clap(value_parser=maybe_hex::<u8>)]
        parameter: u8,
        #[clap(allow_negative_numbers = true)]
        value: i64,
        #[clap(long, default_value = "4")]
        length: u8,
    },
    /// Show SR32, motion errors and position of a TML axis
    Axis {
        #[clap(value_parser=maybe_hex::<u8>)]
        axis_id: u8,
    },
}

fn run(mcs: &Mcs, command: Command) -> mcs_client::Result<()> {
    let wait = Wait::Timeout(DEFAULT_WAIT_TIMEOUT);
    match command {
        Command::Scan => {
            mcs.open(RegisterMode::Scan)?;
            for device in mcs.registered_devices() {
                let version = device.info_firmware_version()?;
                println!(
                    "{} {:<30} {}",
                    device.address(),
                    device.name(),
                    version.research_string()
                );
            }
        }
        Command::Info { address } => {
            mcs.open(RegisterMode::Ignore)?;
            let device = mcs.create_device(address as u8);
            let version = device.info_firmware_version()?;
            let hw = device.info_hardware_configuration()?;
            let (error, warning) = device.info_error()?;
            println!("Module:    {device}");
            println!("Firmware:  {} ({})", version.research_string(), version.medical_string());
            println!(
                "Hardware:  version {}, controller mode {}, boot id {}, boot block {}, main block {}",
                hw.hardware_version, hw.controller_mode, hw.boot_id, hw.boot_block, hw.main_block
            );
            println!("Status:    {}", device.status());
            println!("Error:     0x{error:04x}");
            println!("Warning:   0x{warning:04x}");
            println!("Com error: 0x{:04x}", device.info_com_error()?);
        }
        Command::Reset { address, mask } => {
            mcs.open(RegisterMode::Ignore)?;
            mcs.create_device(address as u8).reset(mask, wait)?;
        }
        Command::Init { address, mode } => {
            mcs.open(RegisterMode::Ignore)?;
            mcs.create_device(address as u8).init(mode, wait)?;
        }
        Command::GetPort {
            address,
            port,
            signed,
        } => {
            mcs.open(RegisterMode::Ignore)?;
            println!("{}", mcs.create_device(address as u8).get_port(port, signed)?);
        }
        Command::SetPort {
            address,
            port,
            value,
            length,
        } => {
            mcs.open(RegisterMode::Ignore)?;
            mcs.create_device(address as u8)
                .set_port(port, value, length, 0, Wait::NoWait)?;
        }
        Command::GetParam {
            address,
            parameter,
            signed,
        } => {
            mcs.open(RegisterMode::Ignore)?;
            let device = mcs.create_device(address as u8);
            println!("{}", device.get_parameter(parameter, signed)?);
        }
        Command::SetParam {
            address,
            parameter,
            value,
            length,
        } => {
            mcs.open(RegisterMode::Ignore)?;
            mcs.create_device(address as u8)
                .set_parameter(parameter, value, length)?;
        }
        Command::Axis { axis_id } => {
            mcs.open(RegisterMode::Ignore)?;
            let axis = mcs.axis(axis_id)?;
            let sr32 = axis.read_sr32()?;
            let mer = axis.read_mer()?;
            let unit = &axis.properties().unit;
            println!("Axis {axis_id} {}", axis.properties().name);
            println!("SR32:     0x{sr32:08x} {}", sr32_description(sr32));
            println!("MER:      0x{mer:04x} {}", mer_description(mer));
            println!("Position: {} {unit}", axis.read_actual_position()?);
            println!("Target:   {} {unit}", axis.read_target_position()?);
            println!("Current:  {}", axis.read_current()?);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => McsConfig::load(path).expect("Failed to load config"),
        None => McsConfig::default(),
    };
    let transport = Arc::new(SocketCanTransport::new(&args.interface));
    let mcs = Mcs::from_config(&config, transport)
        .expect("Invalid config")
        .with_tml();

    let result = run(&mcs, args.command);
    if let Err(e) = mcs.close() {
        log::error!("{e}");
    }
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
