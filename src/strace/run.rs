//! Strace invocation code

use std::{
    env,
    fs::File,
    io::BufReader,
    num::NonZeroU32,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use anyhow::Context as _;
use nix::{
    sys::{
        signal::{Signal, kill},
        stat::Mode,
    },
    unistd::Pid,
};

use crate::strace::{STRACE_BIN, parser::RecordParser};

pub(crate) struct Strace {
    /// Strace process
    process: Child,
    /// Strace pid, kept apart to signal it from other threads
    pid: Pid,
    /// Pipe dir
    pipe_dir: PathBuf,
    /// Temp dir for pipe location
    _tmp_pipe_dir: Option<tempfile::TempDir>,
    /// Strace log mirror path
    log_path: Option<PathBuf>,
}

impl Strace {
    pub(crate) fn run(
        command: &[&str],
        string_limit: NonZeroU32,
        log_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        // Use runtime directory or a temp dir for named pipe
        let (pipe_dir, tmp_dir) = env::var_os("RUNTIME_DIRECTORY")
            .and_then(|rd| env::split_paths(&rd).last())
            .map_or_else(
                || -> anyhow::Result<_> {
                    let tmp_dir =
                        tempfile::tempdir().context("Failed to create temporary directory")?;
                    Ok((tmp_dir.path().to_owned(), Some(tmp_dir)))
                },
                |d| Ok((d, None)),
            )?;

        // Create named pipe
        let pipe_path = Self::pipe_path(&pipe_dir);
        nix::unistd::mkfifo(&pipe_path, Mode::S_IRUSR | Mode::S_IWUSR)
            .with_context(|| format!("Failed to create named pipe in {pipe_path:?}"))?;

        // Start process
        let child = Command::new(STRACE_BIN)
            .args(Self::args(&pipe_path, string_limit)?)
            .arg("--")
            .args(command)
            .env("LANG", "C") // avoids locale side effects
            .stdin(Stdio::null())
            .spawn()
            .context("Failed to start strace")?;
        let pid = Pid::from_raw(i32::try_from(child.id()).context("Invalid strace pid")?);
        log::info!("Started strace with pid {pid}");

        Ok(Self {
            process: child,
            pid,
            pipe_dir,
            _tmp_pipe_dir: tmp_dir,
            log_path,
        })
    }

    /// Strace options producing the line format the record parser expects
    fn args(pipe_path: &Path, string_limit: NonZeroU32) -> anyhow::Result<Vec<String>> {
        Ok(vec![
            // Decode fd paths and socket endpoints
            "-yy".to_owned(),
            "-e".to_owned(),
            "verbose=all".to_owned(),
            // Instruction pointer
            "-i".to_owned(),
            // Absolute timestamps with microseconds
            "-ttt".to_owned(),
            // Unabbreviated structures
            "-v".to_owned(),
            // All string bytes as hex escapes
            "-xx".to_owned(),
            "-s".to_owned(),
            string_limit.to_string(),
            // Signal delivery lines are neither syscalls nor exits
            "-e".to_owned(),
            "signal=none".to_owned(),
            "-o".to_owned(),
            pipe_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Non UTF-8 pipe path {pipe_path:?}"))?
                .to_owned(),
        ])
    }

    fn pipe_path(dir: &Path) -> PathBuf {
        dir.join("strace.pipe")
    }

    pub(crate) fn log_lines(&self) -> anyhow::Result<RecordParser> {
        let pipe_path = Self::pipe_path(&self.pipe_dir);
        let reader = BufReader::new(File::open(pipe_path)?);
        RecordParser::new(Box::new(reader), self.log_path.as_deref())
    }

    /// Ask strace to detach and exit
    pub(crate) fn stop(&self) {
        if let Err(e) = kill(self.pid, Signal::SIGTERM) {
            log::warn!("Failed to signal strace: {e}");
        }
    }
}

impl Drop for Strace {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_args() {
        let args = Strace::args(
            Path::new("/run/strace.pipe"),
            NonZeroU32::new(1024).unwrap(),
        )
        .unwrap();
        assert_eq!(
            args,
            [
                "-yy",
                "-e",
                "verbose=all",
                "-i",
                "-ttt",
                "-v",
                "-xx",
                "-s",
                "1024",
                "-e",
                "signal=none",
                "-o",
                "/run/strace.pipe"
            ]
        );
    }
}
