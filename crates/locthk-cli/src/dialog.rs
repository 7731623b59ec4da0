//! Parameter dialog on the terminal.

use std::io::{self, BufRead, StdinLock, Stderr, Write};

use locthk_pipeline::{DialogResponse, ParameterDialog, ParameterForm, PresetDialog};

/// Answer that cancels the prompt.
const CANCEL_WORDS: &[&str] = &["cancel", "q", "quit"];

/// Prompts for each field on a line-oriented terminal.
///
/// An empty answer keeps the pre-filled value. Typing `cancel`, or
/// closing the input, cancels the whole run.
pub struct TerminalDialog<R, W> {
    input: R,
    output: W,
}

impl TerminalDialog<StdinLock<'static>, Stderr> {
    /// Prompt on stderr and read answers from stdin.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalDialog<R, W> {
    /// Dialog over arbitrary streams.
    pub const fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, form: &ParameterForm) -> io::Result<Option<DialogResponse>> {
        writeln!(self.output, "{}", form.title)?;
        writeln!(
            self.output,
            "(Enter keeps the value shown, 'cancel' aborts)"
        )?;

        write!(self.output, "{} [{}]: ", form.threshold_label, form.threshold)?;
        self.output.flush()?;
        let Some(answer) = self.answer()? else {
            return Ok(None);
        };
        let threshold = if answer.is_empty() {
            form.threshold.to_string()
        } else {
            answer
        };

        let hint = if form.inverse { "Y/n" } else { "y/N" };
        write!(self.output, "{} [{hint}]: ", form.inverse_label)?;
        self.output.flush()?;
        let Some(answer) = self.answer()? else {
            return Ok(None);
        };
        let inverse = parse_yes_no(&answer).unwrap_or(form.inverse);

        Ok(Some(DialogResponse::Confirmed { threshold, inverse }))
    }

    /// Next trimmed line, or `None` on end of input or a cancel word.
    fn answer(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let answer = line.trim();
        if CANCEL_WORDS.iter().any(|w| answer.eq_ignore_ascii_case(w)) {
            return Ok(None);
        }
        Ok(Some(answer.to_owned()))
    }
}

impl<R: BufRead, W: Write> ParameterDialog for TerminalDialog<R, W> {
    fn show(&mut self, form: &ParameterForm) -> DialogResponse {
        match self.prompt(form) {
            Ok(Some(response)) => response,
            Ok(None) => DialogResponse::Cancelled,
            Err(e) => {
                tracing::warn!(error = %e, "could not read parameters, cancelling");
                DialogResponse::Cancelled
            }
        }
    }
}

/// `y`/`yes`/`true` or `n`/`no`/`false`, case-insensitive.
fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => Some(true),
        "n" | "no" | "false" => Some(false),
        _ => None,
    }
}

/// The dialog chosen on the command line.
pub enum CliDialog {
    /// `--batch`: confirm without prompting.
    Preset(PresetDialog),
    /// Interactive prompt.
    Terminal(TerminalDialog<StdinLock<'static>, Stderr>),
}

impl ParameterDialog for CliDialog {
    fn show(&mut self, form: &ParameterForm) -> DialogResponse {
        match self {
            Self::Preset(d) => d.show(form),
            Self::Terminal(d) => d.show(form),
        }
    }
}
