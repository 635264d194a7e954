use std::sync::Mutex;

/// Operator-facing progress channel, separate from the `tracing` log.
///
/// Formatting follows the buildpack convention: steps are prefixed with
/// `-----> `, script output is indented by seven spaces.
pub trait BuildOutput {
    /// A complete step message on its own line.
    fn step(&self, msg: &str);

    /// Start a step whose outcome [`BuildOutput::finish`] appends to the
    /// same line.
    fn begin(&self, msg: &str);

    fn finish(&self, outcome: &str);

    /// One line of script output.
    fn line(&self, line: &str);
}

pub const STEP_PREFIX: &str = "-----> ";
pub const LINE_PREFIX: &str = "       ";

/// Records output as the text a terminal would show. Used by tests and by
/// embedders that forward build logs elsewhere.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    text: Mutex<String>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.text.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_owned).collect()
    }

    fn push(&self, s: &str) {
        if let Ok(mut text) = self.text.lock() {
            text.push_str(s);
        }
    }
}

impl BuildOutput for CapturedOutput {
    fn step(&self, msg: &str) {
        self.push(&format!("{STEP_PREFIX}{msg}\n"));
    }

    fn begin(&self, msg: &str) {
        self.push(&format!("{STEP_PREFIX}{msg} "));
    }

    fn finish(&self, outcome: &str) {
        self.push(&format!("{outcome}\n"));
    }

    fn line(&self, line: &str) {
        self.push(&format!("{LINE_PREFIX}{line}\n"));
    }
}
