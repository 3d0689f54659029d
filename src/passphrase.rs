//! Passphrase reading functionality
//!
//! Terminal input comes in three strategies ranked by how much they hide:
//! a raw-mode reader that echoes a mask character per keystroke, a hidden
//! reader with no echo at all, and a plain line reader. The best one the
//! current process supports is picked once by [`TerminalCapability::probe`].

use crate::error::{ErrorCategory, ErrorKind, Result, ShroudError};
use crate::policy::{self, DEFAULT_GENERATED_LENGTH};
use crate::secret::Secret;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::{Zeroize, Zeroizing};

/// Prompt shown when asking for a new run secret.
pub const NEW_SECRET_PROMPT: &str =
    "Password (empty to generate one; Ctrl+C to abort): ";

/// Prompt shown when asking for the secret of an existing container.
pub const EXISTING_SECRET_PROMPT: &str = "Password: ";

const MASK_CHAR: char = '*';

/// Trait for reading passphrases from various sources
pub trait PassphraseReader {
    /// Show `prompt` and read one passphrase, without the line terminator.
    ///
    /// Returns the passphrase wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self, prompt: &str) -> Result<Zeroizing<String>>;
}

/// Returns a fixed passphrase (for testing)
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<String>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self, _prompt: &str) -> Result<Zeroizing<String>> {
        Ok(self.passphrase.clone())
    }
}

/// Reads one line per call from any buffered source, with visible input.
///
/// This is the last-resort terminal strategy, and also what
/// `--passphrase-stdin` uses. End of input before any character is an
/// error rather than an empty passphrase, so a closed stdin cannot
/// silently trigger generation loops.
pub struct LineReader<R: BufRead> {
    reader: R,
    echo_prompt: bool,
}

impl<R: BufRead> LineReader<R> {
    /// A reader that writes the prompt to stderr before each line.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            echo_prompt: true,
        }
    }

    /// A reader that never prompts, for piped input.
    pub fn quiet(reader: R) -> Self {
        Self {
            reader,
            echo_prompt: false,
        }
    }
}

impl<R: BufRead> PassphraseReader for LineReader<R> {
    fn read_passphrase(&mut self, prompt: &str) -> Result<Zeroizing<String>> {
        if self.echo_prompt {
            write_prompt(prompt)?;
        }
        let mut line = Zeroizing::new(String::new());
        let read = self.reader.read_line(&mut line).map_err(|e| {
            ShroudError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        if read == 0 {
            return Err(ShroudError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "no passphrase input available (end of input)",
            ));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}

/// Reads passphrase from terminal with no echo
pub struct HiddenTerminalReader;

impl PassphraseReader for HiddenTerminalReader {
    fn read_passphrase(&mut self, prompt: &str) -> Result<Zeroizing<String>> {
        write_prompt(prompt)?;
        // Note: rpassword returns String, not zeroized
        let passphrase = rpassword::read_password().map_err(|e| {
            ShroudError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?;
        Ok(Zeroizing::new(passphrase))
    }
}

/// Reads passphrase from terminal in raw mode, echoing a mask per keystroke.
///
/// Backspace removes the last character, Enter submits, Ctrl+C aborts with
/// [`ErrorKind::UserInterrupted`].
pub struct MaskedTerminalReader;

/// Leaves raw mode when dropped, including on early return.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

impl PassphraseReader for MaskedTerminalReader {
    fn read_passphrase(&mut self, prompt: &str) -> Result<Zeroizing<String>> {
        write_prompt(prompt)?;
        let mut out = io::stderr();
        let _guard = RawModeGuard::enable().map_err(terminal_error)?;
        let keys = std::iter::from_fn(|| Some(event::read()));
        read_masked(keys, &mut out)
    }
}

/// What a single key press does to a masked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    /// A character was appended; echo one mask character.
    Appended,
    /// The last character was removed; erase one mask character.
    Erased,
    /// Nothing changed.
    Ignored,
    Submit,
    /// The buffer has been wiped and entry must abort.
    Interrupt,
}

/// Apply one key press to `buf`.
fn apply_key(buf: &mut Zeroizing<String>, code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
    let control = modifiers.contains(KeyModifiers::CONTROL);
    match code {
        KeyCode::Enter => KeyAction::Submit,
        KeyCode::Char('c') if control => {
            buf.zeroize();
            KeyAction::Interrupt
        }
        KeyCode::Backspace => match buf.pop() {
            Some(_) => KeyAction::Erased,
            None => KeyAction::Ignored,
        },
        KeyCode::Char(c) if !control => {
            buf.push(c);
            KeyAction::Appended
        }
        _ => KeyAction::Ignored,
    }
}

/// Collect a masked passphrase from a stream of terminal events, echoing
/// to `out`. Key releases and non-key events are ignored.
fn read_masked(
    events: impl Iterator<Item = io::Result<Event>>,
    out: &mut dyn Write,
) -> Result<Zeroizing<String>> {
    let mut buf = Zeroizing::new(String::new());
    for event in events {
        let (code, modifiers) = match event.map_err(terminal_error)? {
            Event::Key(KeyEvent {
                code,
                modifiers,
                kind,
                ..
            }) if kind != KeyEventKind::Release => (code, modifiers),
            _ => continue,
        };
        match apply_key(&mut buf, code, modifiers) {
            KeyAction::Appended => {
                let _ = write!(out, "{}", MASK_CHAR);
            }
            KeyAction::Erased => {
                let _ = write!(out, "\x08 \x08");
            }
            KeyAction::Ignored => {}
            KeyAction::Submit => {
                let _ = write!(out, "\r\n");
                let _ = out.flush();
                return Ok(buf);
            }
            KeyAction::Interrupt => {
                let _ = write!(out, "\r\n");
                let _ = out.flush();
                return Err(ShroudError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::UserInterrupted,
                    "passphrase entry interrupted",
                ));
            }
        }
        let _ = out.flush();
    }
    Err(ShroudError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::PassphraseUnavailable,
        "terminal input ended before Enter",
    ))
}

/// Which terminal reading strategy the current process supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalCapability {
    /// Raw mode works: echo a mask character per keystroke.
    Masked,
    /// Stdin is a terminal but raw mode is unavailable: read without echo.
    Hidden,
    /// Stdin is not a terminal: read a visible line.
    Plain,
}

impl TerminalCapability {
    /// Probe once at startup, from the strongest strategy down.
    pub fn probe() -> Self {
        if !io::stdin().is_terminal() {
            return TerminalCapability::Plain;
        }
        match RawModeGuard::enable() {
            Ok(_guard) => TerminalCapability::Masked,
            Err(e) => {
                log::debug!("raw terminal mode unavailable: {}", e);
                TerminalCapability::Hidden
            }
        }
    }

    /// Build the reader for this strategy.
    pub fn reader(self) -> Box<dyn PassphraseReader> {
        match self {
            TerminalCapability::Masked => Box::new(MaskedTerminalReader),
            TerminalCapability::Hidden => Box::new(HiddenTerminalReader),
            TerminalCapability::Plain => Box::new(LineReader::new(io::stdin().lock())),
        }
    }
}

/// Acquire the run secret interactively.
///
/// Loops until the user either enters a secret that passes
/// [`policy::validate`] or submits an empty line, in which case a strong
/// secret is generated and written to `notice` exactly once. Policy
/// rejections are also reported on `notice`. Interruption and reader
/// failures are returned as errors.
pub fn acquire_interactive(
    reader: &mut dyn PassphraseReader,
    notice: &mut dyn Write,
) -> Result<Secret> {
    loop {
        let candidate = reader.read_passphrase(NEW_SECRET_PROMPT)?;
        if candidate.is_empty() {
            let secret = policy::generate_strong(DEFAULT_GENERATED_LENGTH);
            announce_generated(&secret, notice)?;
            return Ok(secret);
        }
        match policy::validate(&candidate) {
            Ok(()) => return Ok(Secret::from(candidate)),
            Err(violation) => {
                writeln!(notice, "Password rejected: {}", violation).map_err(notice_error)?;
            }
        }
    }
}

/// Read a secret non-interactively and require it to pass the policy.
pub fn acquire_validated(reader: &mut dyn PassphraseReader) -> Result<Secret> {
    let candidate = reader.read_passphrase(NEW_SECRET_PROMPT)?;
    policy::validate(&candidate).map_err(|violation| {
        ShroudError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::PolicyViolation,
            format!("password rejected: {}", violation),
            violation,
        )
    })?;
    Ok(Secret::from(candidate))
}

/// Read the secret of an existing container. No policy is applied.
pub fn read_existing(reader: &mut dyn PassphraseReader) -> Result<Secret> {
    let secret = Secret::from(reader.read_passphrase(EXISTING_SECRET_PROMPT)?);
    if secret.is_empty() {
        return Err(ShroudError::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseUnavailable,
            "empty password",
        ));
    }
    Ok(secret)
}

/// Show a generated secret to the user. This is the only place a secret is
/// ever written anywhere, and `notice` must be the terminal.
pub fn announce_generated(secret: &Secret, notice: &mut dyn Write) -> Result<()> {
    writeln!(
        notice,
        "Generated password (shown once, store it now): {}",
        secret.expose()
    )
    .map_err(notice_error)
}

fn write_prompt(prompt: &str) -> Result<()> {
    let mut err = io::stderr();
    err.write_all(prompt.as_bytes()).map_err(|e| {
        ShroudError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to write prompt: {}", e),
            e,
        )
    })?;
    err.flush().map_err(|e| {
        ShroudError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to flush prompt: {}", e),
            e,
        )
    })
}

fn terminal_error(e: io::Error) -> ShroudError {
    ShroudError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::PassphraseUnavailable,
        format!("terminal input failed: {}", e),
        e,
    )
}

fn notice_error(e: io::Error) -> ShroudError {
    ShroudError::io(ErrorCategory::Internal, "failed to write notice", e)
}
