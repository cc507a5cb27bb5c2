use std::io::{self, Write};
use std::sync::mpsc::Receiver;

use asda_rs::cmds::JogCommand;
use asda_rs::{JogError, ServoController};
use log::{debug, warn};

/// One event for the operator loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl-C
    Interrupted,
    /// stdin reached end of file
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    Forward,
    Reverse,
    Stop,
    SpeedUp,
    SpeedDown,
    Quit,
}

impl MenuCommand {
    /// Map an operator line; blank or space-only input means stop.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "w" | "forward" => Some(MenuCommand::Forward),
            "s" | "reverse" => Some(MenuCommand::Reverse),
            "" | "stop" => Some(MenuCommand::Stop),
            "+" => Some(MenuCommand::SpeedUp),
            "-" => Some(MenuCommand::SpeedDown),
            "q" | "quit" => Some(MenuCommand::Quit),
            _ => None,
        }
    }
}

pub fn print_banner(controller: &ServoController, step: u16) {
    println!("{}", "=".repeat(50));
    println!("Ready for JOG control");
    println!("Current speed: {} r/min", controller.current_speed());
    println!("Commands:");
    println!("  w     - rotate forward (CW)");
    println!("  s     - rotate reverse (CCW)");
    println!("  space - stop rotation");
    println!("  +     - speed up by {} r/min", step);
    println!("  -     - slow down by {} r/min", step);
    println!("  q     - quit");
    println!("{}", "=".repeat(50));
}

fn report(result: Result<(), JogError>, done: impl FnOnce()) {
    match result {
        Ok(()) => done(),
        Err(JogError::Faulted(fault)) => {
            println!("Refused: alarm {} is active, clear it on the drive first", fault)
        }
        Err(err) => println!("Command failed: {}", err),
    }
}

/// Apply one command. Returns false when the operator asked to quit.
pub fn execute(controller: &mut ServoController, command: MenuCommand, step: u16) -> bool {
    debug!("Menu command {:?}", command);
    match command {
        MenuCommand::Forward => report(controller.jog(JogCommand::Forward), || {
            println!("Rotating FORWARD ({} r/min)", controller.current_speed())
        }),
        MenuCommand::Reverse => report(controller.jog(JogCommand::Reverse), || {
            println!("Rotating REVERSE ({} r/min)", controller.current_speed())
        }),
        MenuCommand::Stop => report(controller.stop_jog(), || println!("Stopped")),
        MenuCommand::SpeedUp => report(controller.increase_speed(step), || {
            println!("Speed increased: {} r/min", controller.current_speed())
        }),
        MenuCommand::SpeedDown => report(controller.decrease_speed(step), || {
            println!("Speed decreased: {} r/min", controller.current_speed())
        }),
        MenuCommand::Quit => {
            println!("Exiting...");
            return false;
        }
    }
    true
}

/// Whether Ctrl-C arrived while nothing was reading the channel yet.
pub fn interrupt_pending(inputs: &Receiver<Input>) -> bool {
    inputs.try_iter().any(|input| input == Input::Interrupted)
}

/// Operator loop; returns once the operator quits, presses Ctrl-C or stdin closes.
///
/// The caller still owns the shutdown sequence.
pub fn run(controller: &mut ServoController, step: u16, inputs: &Receiver<Input>) {
    loop {
        print!("Command: ");
        // a prompt that fails to flush is cosmetic
        let _ = io::stdout().flush();

        match inputs.recv() {
            Ok(Input::Line(line)) => match MenuCommand::parse(&line) {
                Some(command) => {
                    if !execute(controller, command, step) {
                        break;
                    }
                }
                None => println!("Unknown command. Use w, s, space, +, - or q."),
            },
            Ok(Input::Interrupted) => {
                println!();
                warn!("Interrupted by operator");
                break;
            }
            Ok(Input::Closed) | Err(_) => {
                println!();
                debug!("Input closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asda_rs::cmds::{JOG_FORWARD, JOG_STOP};
    use asda_rs::transport::MemoryTransport;
    use asda_rs::Direction;
    use std::sync::mpsc;

    #[test]
    fn parses_keys_and_blank_line() {
        assert_eq!(MenuCommand::parse("w"), Some(MenuCommand::Forward));
        assert_eq!(MenuCommand::parse(" S \n"), Some(MenuCommand::Reverse));
        assert_eq!(MenuCommand::parse(" "), Some(MenuCommand::Stop));
        assert_eq!(MenuCommand::parse(""), Some(MenuCommand::Stop));
        assert_eq!(MenuCommand::parse("+"), Some(MenuCommand::SpeedUp));
        assert_eq!(MenuCommand::parse("-"), Some(MenuCommand::SpeedDown));
        assert_eq!(MenuCommand::parse("Q"), Some(MenuCommand::Quit));
        assert_eq!(MenuCommand::parse("x"), None);
    }

    #[test]
    fn scripted_session_drives_the_controller() {
        let drive = MemoryTransport::new();
        let mut controller = ServoController::with_transport(drive.clone());
        let (tx, rx) = mpsc::channel();
        for line in ["w", "+", "bogus", " ", "q", "w"] {
            tx.send(Input::Line(line.to_string())).unwrap();
        }

        run(&mut controller, 25, &rx);

        assert_eq!(controller.current_speed(), 45);
        assert_eq!(controller.current_direction(), Direction::Stopped);
        assert_eq!(drive.jog_writes(), vec![JOG_FORWARD, 45, JOG_FORWARD, JOG_STOP]);
    }

    #[test]
    fn pending_interrupt_is_detected() {
        let (tx, rx) = mpsc::channel();
        assert!(!interrupt_pending(&rx));
        tx.send(Input::Interrupted).unwrap();
        assert!(interrupt_pending(&rx));
        assert!(!interrupt_pending(&rx));
    }

    #[test]
    fn interrupt_ends_the_loop() {
        let drive = MemoryTransport::new();
        let mut controller = ServoController::with_transport(drive.clone());
        let (tx, rx) = mpsc::channel();
        tx.send(Input::Line("s".into())).unwrap();
        tx.send(Input::Interrupted).unwrap();
        tx.send(Input::Line("w".into())).unwrap();

        run(&mut controller, 25, &rx);
        assert_eq!(controller.current_direction(), Direction::Reverse);

        controller.close().unwrap();
        assert_eq!(drive.jog_writes(), vec![4998, JOG_STOP, 20]);
    }
}
