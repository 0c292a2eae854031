//! In-memory [`CommandRunner`] for unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use protocol::CommandResult;

use crate::error::{ControlError, Result};
use crate::runner::CommandRunner;

/// Answers each call with the result registered for the first matching argument.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, CommandResult)>,
    fail: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers calls whose arguments contain `arg` with `result`.
    pub fn on(mut self, arg: &str, result: CommandResult) -> Self {
        self.rules.push((arg.to_string(), result));
        self
    }

    /// Makes every call fail as if the program could not be spawned.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Makes every call take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the argument vectors of all calls so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the largest number of calls that were in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        self.calls.lock().unwrap().push(args.to_vec());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            if let Some(limit) = timeout {
                if limit < delay {
                    tokio::time::sleep(limit).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(ControlError::Timeout {
                        program: program.to_path_buf(),
                        after: limit,
                    });
                }
            }
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(ControlError::Execution {
                program: program.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted failure"),
            });
        }

        Ok(self
            .rules
            .iter()
            .find(|(arg, _)| args.iter().any(|a| a == arg))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| CommandResult::new("", "unexpected command", 1)))
    }
}
