//! Worker command lines.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Switch names understood by workers.
pub mod switches {
    pub const PROCESS_TYPE: &str = "type";
    pub const SERVICE_REQUEST_CHANNEL_TOKEN: &str = "service-request-channel-token";
    pub const WORKER_CLIENT_ID: &str = "worker-client-id";
    pub const LANG: &str = "lang";
    pub const SERVICE_NAME: &str = "service-name";
}

/// A program plus `--name[=value]` switches and positional arguments.
///
/// Each switch appears at most once; appending an existing switch replaces
/// its value in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    program: PathBuf,
    switches: Vec<(String, Option<String>)>,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            switches: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Parse an argv. The first element is the program.
    ///
    /// Everything after a bare `--` is positional.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = args.into_iter().map(Into::into);
        let mut command_line = Self::new(iter.next().unwrap_or_default());
        let mut positional_only = false;
        for arg in iter {
            if positional_only {
                command_line.args.push(arg);
                continue;
            }
            if arg == "--" {
                positional_only = true;
                continue;
            }
            match arg.strip_prefix("--") {
                Some(switch) => match switch.split_once('=') {
                    Some((name, value)) => command_line.append_switch_value(name, value),
                    None => command_line.append_switch(switch),
                },
                None => command_line.args.push(arg),
            }
        }
        command_line
    }

    /// The command line this process was started with.
    pub fn for_current_process() -> Self {
        Self::from_args(std::env::args())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn append_switch(&mut self, name: &str) {
        self.set(name, None);
    }

    pub fn append_switch_value(&mut self, name: &str, value: &str) {
        self.set(name, Some(value.to_string()));
    }

    pub fn append_arg(&mut self, arg: &str) {
        self.args.push(arg.to_string());
    }

    pub fn has_switch(&self, name: &str) -> bool {
        self.switches.iter().any(|(n, _)| n == name)
    }

    pub fn switch_value(&self, name: &str) -> Option<&str> {
        self.switches
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn switch_names(&self) -> impl Iterator<Item = &str> {
        self.switches.iter().map(|(n, _)| n.as_str())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Copy the named switches, with their values, from `source`.
    pub fn copy_switches_from(&mut self, source: &CommandLine, names: &[String]) {
        for name in names {
            if let Some((_, value)) = source.switches.iter().find(|(n, _)| n == name) {
                self.set(name, value.clone());
            }
        }
    }

    /// Program, then switches, then `--` and positional arguments if any.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv = vec![self.program.clone().into_os_string()];
        argv.extend(self.switch_args().into_iter().map(OsString::from));
        if !self.args.is_empty() {
            argv.push(OsString::from("--"));
            argv.extend(self.args.iter().map(OsString::from));
        }
        argv
    }

    fn switch_args(&self) -> Vec<String> {
        self.switches
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("--{}={}", name, value),
                None => format!("--{}", name),
            })
            .collect()
    }

    fn set(&mut self, name: &str, value: Option<String>) {
        match self.switches.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.switches.push((name.to_string(), value)),
        }
    }
}
