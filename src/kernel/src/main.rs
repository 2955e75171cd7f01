//! Tilia Kernel Entry Point
//!
//! Boots the kernel on the simulated machine and runs it until the
//! operator's Control-C or something fatal stops it.
//!
//! Usage: `tilia-kernel [allocators|fork] [steps]`

use std::process::ExitCode;

use log::LevelFilter;
use tilia_common::Fatal;
use tilia_kernel::arch::sim::{SerialBuffer, SimLoader, SimPlatform};
use tilia_kernel::boot::{self, Status};
use tilia_kernel::{klog, BootCommand, Kernel, KernelConfig};

/// Traps handled before Control-C is typed.
const DEFAULT_STEPS: usize = 5_000;

/// Keyboard polls after which the operator gives up anyway.
const ABORT_BUDGET: u64 = 10_000_000;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let command = BootCommand::parse(&args.next().unwrap_or_default());
    let steps = args
        .next()
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_STEPS);

    // ========================================================================
    // Phase 1: Logging
    // ========================================================================
    let serial = SerialBuffer::new();
    if let Err(err) = klog::init(Box::new(serial.clone()), LevelFilter::Info) {
        eprintln!("logger already installed: {}", err);
    }

    // ========================================================================
    // Phase 2: Boot
    // ========================================================================
    let platform = SimPlatform::new().with_abort_budget(ABORT_BUDGET);
    let keyboard = platform.keyboard();
    let config = KernelConfig::default()
        .with_command(command)
        .with_selftest(true);

    let mut kernel = match Kernel::boot(platform, config, &mut SimLoader) {
        Ok(kernel) => kernel,
        Err(fatal) => {
            boot::log(Status::Fail, &format!("Boot failed: {}", fatal));
            print!("{}", serial.take());
            return ExitCode::FAILURE;
        }
    };

    // ========================================================================
    // Phase 3: Run
    // ========================================================================
    let mut halted = None;
    for _ in 0..steps {
        if let Err(fatal) = kernel.step() {
            halted = Some(fatal);
            break;
        }
    }
    let fatal = match halted {
        Some(fatal) => {
            kernel.report(&fatal);
            fatal
        }
        None => {
            keyboard.press_ctrl_c();
            kernel.run()
        }
    };

    print!("{}", kernel.platform().screen_text());
    println!("{}", "-".repeat(80));
    print!("{}", serial.take());
    println!(
        "halted after {} ticks, {} instructions: {}",
        kernel.ticks(),
        kernel.platform().cpu().executed(),
        fatal
    );

    if fatal == Fatal::AbortRequested {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
