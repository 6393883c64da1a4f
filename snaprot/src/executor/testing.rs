//! Scripted runner for unit tests: records every argument vector and answers
//! from a caller-supplied function instead of spawning processes.

use super::{CommandResult, CommandRunner};
use std::ffi::OsString;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&[String]) -> CommandResult + Send + Sync>;

pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<Vec<String>>>,
    respond: Responder,
}

impl ScriptedRunner {
    /// Every command succeeds with empty output.
    pub(crate) fn succeeding() -> Self {
        Self::new(|_| CommandResult::success(Vec::new()))
    }

    pub(crate) fn new<F>(respond: F) -> Self
    where
        F: Fn(&[String]) -> CommandResult + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose program ends with `name`.
    pub(crate) fn calls_to(&self, name: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| argv.first().is_some_and(|p| p.ends_with(name)))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, argv: &[OsString]) -> CommandResult {
        let argv: Vec<String> = argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let result = (self.respond)(&argv);
        self.calls.lock().unwrap().push(argv);
        result
    }
}
