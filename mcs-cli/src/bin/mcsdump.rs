use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mcs_client::{
    mcs_common::{names::describe, SocketCanTransport},
    Bus,
};

#[derive(Parser, Debug)]
#[command(version, about = "Print decoded MCS and TML traffic")]
struct Args {
    /// CAN interface, e.g. can0
    socket: String,
    /// Also write the traffic to a rotating log file
    #[clap(long)]
    log_file: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let bus = Bus::new(Arc::new(SocketCanTransport::new(args.socket.as_str())));
    bus.open().expect("Failed to open bus");
    if args.log_file {
        match bus.log_to_file(None) {
            Ok(path) => println!("Logging to {}", path.display()),
            Err(e) => log::error!("{e}"),
        }
    }

    loop {
        match bus.read() {
            Some(msg) => {
                let time = chrono::Local::now().format("%H:%M:%S%.3f");
                println!("{time} {}", describe(&msg));
            }
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
}
