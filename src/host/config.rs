//! Settings shared by every host.

use std::path::PathBuf;

use crate::launch::CommandLine;

/// Upper bound on live worker hosts before reuse kicks in.
pub const MAX_PROCESS_COUNT: usize = 82;

/// Overrides of the process limit never go below this.
pub const MIN_PROCESS_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub single_process: bool,
    pub disable_kill_after_bad_message: bool,
    pub disable_backgrounding: bool,
    pub worker_program: PathBuf,
    pub utility_program: Option<PathBuf>,
    pub lang: String,
    pub propagate_switches: Vec<String>,
    pub extra_args: Vec<String>,
    pub max_process_count: usize,
    pub process_per_site: bool,
    /// Switches listed in `propagate_switches` are copied from here.
    pub base_command_line: CommandLine,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            single_process: false,
            disable_kill_after_bad_message: false,
            disable_backgrounding: false,
            worker_program: PathBuf::from("prochost-worker"),
            utility_program: None,
            lang: "en-US".to_string(),
            propagate_switches: Vec::new(),
            extra_args: Vec::new(),
            max_process_count: MAX_PROCESS_COUNT,
            process_per_site: false,
            base_command_line: CommandLine::for_current_process(),
        }
    }
}

impl HostConfig {
    pub fn with_single_process(mut self, single_process: bool) -> Self {
        self.single_process = single_process;
        self
    }

    pub fn with_disable_kill_after_bad_message(mut self, disable: bool) -> Self {
        self.disable_kill_after_bad_message = disable;
        self
    }

    pub fn with_disable_backgrounding(mut self, disable: bool) -> Self {
        self.disable_backgrounding = disable;
        self
    }

    pub fn with_worker_program(mut self, program: PathBuf) -> Self {
        self.worker_program = program;
        self
    }

    pub fn with_utility_program(mut self, program: Option<PathBuf>) -> Self {
        self.utility_program = program;
        self
    }

    pub fn with_lang(mut self, lang: String) -> Self {
        self.lang = lang;
        self
    }

    pub fn with_propagate_switches(mut self, switches: Vec<String>) -> Self {
        self.propagate_switches = switches;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Clamped to [`MIN_PROCESS_COUNT`].
    pub fn with_max_process_count(mut self, count: usize) -> Self {
        self.max_process_count = count.max(MIN_PROCESS_COUNT);
        self
    }

    pub fn with_process_per_site(mut self, enabled: bool) -> Self {
        self.process_per_site = enabled;
        self
    }

    pub fn with_base_command_line(mut self, command_line: CommandLine) -> Self {
        self.base_command_line = command_line;
        self
    }

    /// Program for utility children; the worker program when unset.
    pub fn utility_program(&self) -> &PathBuf {
        self.utility_program.as_ref().unwrap_or(&self.worker_program)
    }
}
