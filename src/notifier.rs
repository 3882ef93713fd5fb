//! Operator-facing output
//!
//! The engine never prints. Everything an operator should see, including
//! confirmation prompts, goes through a [`Notifier`]. Tracing logs are a
//! separate channel for diagnostics.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Sink for operator output and source of operator decisions
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask the operator to approve `prompt`
    async fn confirm(&self, prompt: &str) -> bool;

    /// Report that the run is being abandoned
    fn abort(&self, message: Option<&str>);

    /// Report a line of progress or a per-key outcome
    fn notify(&self, message: &str);

    /// Report a per-key step; dropped unless debug output is enabled
    fn debug(&self, message: &str);
}

/// Writes to stderr and prompts on stdin
#[derive(Debug, Clone)]
pub struct ConsoleNotifier {
    prompt: bool,
    debug: bool,
}

impl ConsoleNotifier {
    /// Create a console notifier.
    ///
    /// With `prompt` disabled every confirmation is answered yes.
    pub fn new(prompt: bool, debug: bool) -> Self {
        Self { prompt, debug }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn confirm(&self, prompt: &str) -> bool {
        if !self.prompt {
            return true;
        }
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "{}\nContinue? [yN] ", prompt);
            let _ = stderr.flush();
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(_) => line,
                Err(_) => String::new(),
            }
        })
        .await
        .unwrap_or_default();
        matches!(answer.trim(), "y" | "Y" | "yes" | "YES" | "Yes")
    }

    fn abort(&self, message: Option<&str>) {
        match message {
            Some(msg) => eprintln!("ABORTED: {}", msg),
            None => eprintln!("ABORTED"),
        }
    }

    fn notify(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn debug(&self, message: &str) {
        if self.debug {
            eprintln!("DEBUG: {}", message);
        }
    }
}

/// Captures output in memory and answers prompts from a script
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    debug: bool,
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
    notifications: Mutex<Vec<String>>,
    debug_lines: Mutex<Vec<String>>,
    aborts: Mutex<Vec<Option<String>>>,
}

impl RecordingNotifier {
    /// Notifier that approves every prompt
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts in order; once the script runs out, prompts are approved
    pub fn with_answers(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Record debug lines too
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Prompts shown so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Notifications emitted so far
    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }

    /// Notifications starting with `prefix`
    pub fn notifications_with(&self, prefix: &str) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Debug lines recorded so far
    pub fn debug_lines(&self) -> Vec<String> {
        self.debug_lines.lock().clone()
    }

    /// Abort calls recorded so far
    pub fn aborts(&self) -> Vec<Option<String>> {
        self.aborts.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().push(prompt.to_string());
        self.answers.lock().pop_front().unwrap_or(true)
    }

    fn abort(&self, message: Option<&str>) {
        self.aborts.lock().push(message.map(str::to_string));
    }

    fn notify(&self, message: &str) {
        self.notifications.lock().push(message.to_string());
    }

    fn debug(&self, message: &str) {
        if self.debug {
            self.debug_lines.lock().push(message.to_string());
        }
    }
}
