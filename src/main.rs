use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use asda_rs::cmds::DEFAULT_JOG_STEP;
use asda_rs::ports;
use asda_rs::transport::MemoryTransport;
use asda_rs::ServoController;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;

mod config;
mod menu;

use menu::Input;

/// JOG mode control of a Delta ASDA servo amplifier over Modbus RTU
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print a starter configuration file and exit
    #[arg(long)]
    print_config: bool,

    /// Run against a simulated drive instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Log level (off, error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

type InputChannel = (mpsc::Sender<Input>, mpsc::Receiver<Input>);

/// Route Ctrl-C into the operator channel so shutdown always goes through `close`.
fn install_interrupt_handler() -> Result<InputChannel, ctrlc::Error> {
    let (tx, rx) = mpsc::channel();
    let interrupt = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(Input::Interrupted);
    })?;
    Ok((tx, rx))
}

fn spawn_stdin_reader(tx: mpsc::Sender<Input>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(Input::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(Input::Closed);
    });
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    SimpleLogger::new().with_level(args.log_level).env().init()?;

    if args.list_ports {
        let found = ports::list_ports();
        if found.is_empty() {
            println!("No serial ports found");
        }
        for port in found {
            println!("{:<20} {}", port.name, port.description);
        }
        return Ok(());
    }
    if args.print_config {
        print!("{}", config::default_template()?);
        return Ok(());
    }

    println!("{}", "=".repeat(50));
    println!("Delta ASDA Servo Controller - JOG Mode");
    println!("{}", "=".repeat(50));

    let (tx, inputs) = install_interrupt_handler()?;

    let (mut controller, step) = if args.simulate {
        info!("Using a simulated drive");
        (ServoController::with_transport(MemoryTransport::new()), DEFAULT_JOG_STEP)
    } else {
        let config = config::load(&args.config)?;
        let mut controller = ServoController::new();
        controller.connect(&config.modbus)?;
        (controller, config.jog.step)
    };

    if menu::interrupt_pending(&inputs) {
        warn!("Interrupted during startup");
        controller.close()?;
        return Ok(());
    }

    if let Err(e) = controller.check_connection() {
        error!("Link check failed: {}", e);
        let _ = controller.close();
        return Err(e.into());
    }
    controller.initialize_speed();

    if menu::interrupt_pending(&inputs) {
        warn!("Interrupted during startup");
        controller.close()?;
        return Ok(());
    }

    spawn_stdin_reader(tx);
    menu::print_banner(&controller, step);
    menu::run(&mut controller, step, &inputs);

    controller.close()?;
    Ok(())
}
