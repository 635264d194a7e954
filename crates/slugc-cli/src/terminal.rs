use console::{Style, Term};
use slugc_core::output::{LINE_PREFIX, STEP_PREFIX};
use slugc_core::{BuildOutput, CompileError};

const ALERT_PREFIX: &str = " !    ";

/// [`BuildOutput`] that writes to a terminal stream, colouring the step
/// arrow when the stream is a tty.
pub struct TerminalOutput {
    term: Term,
    arrow: Style,
    alert: Style,
}

impl TerminalOutput {
    pub fn stdout() -> Self {
        Self {
            term: Term::stdout(),
            arrow: Style::new().cyan().bold(),
            alert: Style::new().red().bold(),
        }
    }

    pub fn stderr() -> Self {
        Self {
            term: Term::stderr(),
            arrow: Style::new().for_stderr().cyan().bold(),
            alert: Style::new().for_stderr().red().bold(),
        }
    }

    /// Print a failed build: the message, then the captured output tail.
    pub fn failure(&self, err: &CompileError) {
        self.write(&format!("\n{} {err}\n", self.alert.apply_to(ALERT_PREFIX)));
        for line in err.output() {
            self.write(&format!("{LINE_PREFIX}{line}\n"));
        }
    }

    fn write(&self, s: &str) {
        // A closed pipe on the operator side must not abort the build.
        let _ = self.term.write_str(s);
    }
}

impl BuildOutput for TerminalOutput {
    fn step(&self, msg: &str) {
        self.write(&format!("{}{msg}\n", self.arrow.apply_to(STEP_PREFIX)));
    }

    fn begin(&self, msg: &str) {
        self.write(&format!("{}{msg} ", self.arrow.apply_to(STEP_PREFIX)));
    }

    fn finish(&self, outcome: &str) {
        self.write(&format!("{outcome}\n"));
    }

    fn line(&self, line: &str) {
        self.write(&format!("{LINE_PREFIX}{line}\n"));
    }
}
