use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};

use ferry::cli::ClientOpts;
use ferry::config::ClientSettings;
use ferry::protocol::Command;
use ferry::shell::{menu, Control, Shell, StdinConfirm};
use ferry::transfer::{AutoConfirm, Confirm};

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    let settings = ClientSettings::load(opts).context("Failed to load configuration")?;
    ferry::init_tracing(&settings.log_level);

    // one request at a time; no need for more than one thread
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let confirmer: Box<dyn Confirm> = if settings.assume_yes {
        Box::new(AutoConfirm(true))
    } else {
        Box::new(StdinConfirm)
    };
    let connect_on_start = settings.connect_on_start;
    let mut shell = Shell::new(settings, confirmer);

    println!("{}", menu());
    if connect_on_start {
        rt.block_on(shell.execute(Command::Connect.token()));
    }

    let stdin = io::stdin();
    loop {
        print!("\nferry> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .context("Failed to read command line")?;
        if read == 0 {
            // end of input behaves like exit
            rt.block_on(shell.execute(Command::Exit.token()));
            break;
        }
        if rt.block_on(shell.execute(&line)) == Control::Exit {
            break;
        }
    }
    Ok(())
}
