//! Strace records: turn strace output into a typed stream of syscall and process exit records

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write as _},
    path::Path,
    sync::Arc,
    thread::{self, sleep},
    time::Duration,
};

use anyhow::Context as _;
use clap::Parser as _;

mod cl;
mod strace;

/// Write records as they are parsed, return how many were written
fn write_records(
    records: strace::RecordParser,
    format: cl::OutputFormat,
) -> anyhow::Result<usize> {
    let mut stdout = BufWriter::new(io::stdout().lock());
    let mut count = 0;
    for record in records {
        let record = record.context("Failed to parse strace output")?;
        match format {
            cl::OutputFormat::Debug => writeln!(stdout, "{record:?}")?,
            cl::OutputFormat::Json => {
                serde_json::to_writer(&mut stdout, &record)
                    .context("Failed to serialize record")?;
                writeln!(stdout)?;
            }
        }
        // Consumers may follow a live trace
        stdout.flush()?;
        count += 1;
        log::trace!("Record timestamp: {}", record.header().timestamp);
    }
    Ok(count)
}

fn open_log(path: Option<&Path>) -> anyhow::Result<Box<dyn BufRead>> {
    match path {
        None => Ok(Box::new(io::stdin().lock())),
        Some(p) if p == Path::new("-") => Ok(Box::new(io::stdin().lock())),
        Some(p) => {
            let file = File::open(p).with_context(|| format!("Failed to open {p:?}"))?;
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Init logger
    simple_logger::SimpleLogger::new()
        .with_level(if cfg!(debug_assertions) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .env()
        .init()
        .context("Failed to setup logger")?;

    // Parse cl args
    let args = cl::Args::parse();

    // Handle CL args
    match args.action {
        cl::Action::Parse { path, output } => {
            let reader = open_log(path.as_deref())?;
            let records = strace::RecordParser::new(reader, None)
                .context("Failed to setup strace output reader")?;
            let count = write_records(records, output.format)?;
            log::debug!("Parsed {count} records");
        }
        cl::Action::Run {
            command,
            string_limit,
            strace_log_path,
            output,
        } => {
            let strace_version =
                strace::StraceVersion::local_system().context("Failed to get strace version")?;
            log::info!("Detected strace version {strace_version}");
            anyhow::ensure!(
                strace_version >= strace::StraceVersion::new(5, 0),
                "Strace version >=5.0 is required"
            );

            // Run strace
            let cmd = command.iter().map(|a| &**a).collect::<Vec<&str>>();
            let st = Arc::new(
                strace::Strace::run(&cmd, string_limit, strace_log_path)
                    .context("Failed to setup strace")?,
            );

            // Start signal handling thread
            let mut signals = signal_hook::iterator::Signals::new([
                signal_hook::consts::signal::SIGINT,
                signal_hook::consts::signal::SIGQUIT,
                signal_hook::consts::signal::SIGTERM,
            ])
            .context("Failed to setup signal handlers")?;
            let st_sig = Arc::clone(&st);
            thread::spawn(move || {
                for sig in signals.forever() {
                    // Let the traced program react to the signal first, so its exit gets recorded
                    const SIGNAL_STRACE_STOP_DELAY: Duration = Duration::from_secs(5);

                    log::info!("Got signal {sig:?}");
                    sleep(SIGNAL_STRACE_STOP_DELAY);
                    log::info!("Stopping strace");
                    st_sig.stop();
                }
            });

            let records = st
                .log_lines()
                .context("Failed to setup strace output reader")?;
            let count = write_records(records, output.format)?;
            log::info!("Parsed {count} records");
        }
        #[cfg(feature = "generate-extra")]
        cl::Action::GenManPages { dir } => {
            use clap::CommandFactory as _;

            // Use the binary name instead of the default of the package name
            let cmd = cl::Args::command().name(env!("CARGO_BIN_NAME"));
            clap_mangen::generate_to(cmd, &dir)?;
        }
        #[cfg(feature = "generate-extra")]
        cl::Action::GenShellComplete { shell, dir } => {
            use clap::{CommandFactory as _, ValueEnum as _};
            use clap_complete::{Shell, generate, generate_to};

            // Use the binary name instead of the default of the package name
            let name = env!("CARGO_BIN_NAME");
            let mut cmd = cl::Args::command().name(name);

            if let Some(shell) = shell {
                if let Some(dir) = dir {
                    generate_to(shell, &mut cmd, name, dir)?;
                } else {
                    generate(shell, &mut cmd, name, &mut io::stdout());
                }
            } else if let Some(dir) = dir {
                let shells = Shell::value_variants();
                for shell_i in shells {
                    generate_to(*shell_i, &mut cmd, name, &dir)?;
                }
            }
        }
    }

    Ok(())
}
