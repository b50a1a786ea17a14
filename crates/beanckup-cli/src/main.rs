use clap::Parser;

use beanckup_core::error::BeanckupError;

mod cmd;
mod format;
mod progress;
mod prompt;
mod table;

#[derive(Parser)]
#[command(
    name = "beanckup",
    version,
    about = "Incremental, deduplicating workspace backups as encrypted 7z packages",
    after_help = "\
Packages land in the delivery directory as <workspace>-S<NN>E<NN>-<stamp>.7z,
each carrying a manifest that records where every file's bytes live. Content
is stored once; later sessions reference it, and restore resolves those
references across packages. Requires the 7z binary on PATH."
)]
struct Cli {
    /// Workspace directory (skips the interactive workspace prompt)
    #[arg(short, long)]
    workspace: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    println!("Welcome to beanckup.");

    loop {
        println!("\n=== Main menu ===");
        println!("  1. Scan and deliver (backup)");
        println!("  2. Restore files");
        println!("  3. Quit");

        let choice = match prompt::ask_choice("Choose an action", 3) {
            Ok(choice) => choice,
            Err(_) => {
                // stdin closed: nothing more to do interactively.
                std::process::exit(0);
            }
        };

        match choice {
            Some(0) => {
                if let Err(e) = cmd::deliver::run(cli.workspace.as_deref()) {
                    report_action_error(e);
                }
            }
            Some(1) => {
                if let Err(e) = cmd::restore::run() {
                    report_action_error(e);
                }
            }
            Some(2) => {
                if prompt::confirm("Really quit?") {
                    println!("Bye.");
                    std::process::exit(0);
                }
            }
            _ => println!("Invalid choice, enter 1-3."),
        }
    }
}

/// Failing disks, corrupted metadata, and broken reference graphs end the
/// process with a non-zero status; anything else returns to the menu so the
/// user can retry with different input.
fn report_action_error(e: BeanckupError) {
    eprintln!("Error: {e}");
    if e.is_fatal() {
        std::process::exit(1);
    }
}
