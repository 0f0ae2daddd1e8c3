//! Immutable descriptions of a command to run.

use super::{ResponseDecoder, TextDecoder};

/// What to run and how to read its output.
///
/// The argument list never carries the elevation prefix; the process
/// controller adds it when [`requires_elevation`](Self::requires_elevation)
/// is true.
pub trait CommandDescriptor: Send + Sync + 'static {
    /// Typed response decoded from stdout.
    type Response: Send + 'static;

    /// First argument passed to the executable (e.g. a subcommand name).
    fn base_command(&self) -> &str;

    /// Arguments following the base command, in order.
    fn arguments(&self) -> Vec<String>;

    /// Whether the command must run with elevated privileges.
    fn requires_elevation(&self) -> bool {
        false
    }

    /// Decode the accumulated stdout. Returns `None` on malformed bytes.
    fn decode_response(&self, bytes: &[u8]) -> Option<Self::Response>;

    /// Full argument vector handed to the executable: base command first,
    /// then the arguments. An empty base command is omitted.
    fn command_line(&self) -> Vec<String> {
        let base = self.base_command();
        let mut line = Vec::new();
        if !base.is_empty() {
            line.push(base.to_string());
        }
        line.extend(self.arguments());
        line
    }
}

/// Builder-style command descriptor with a pluggable decoder.
#[derive(Debug, Clone)]
pub struct Command<D = TextDecoder> {
    base: String,
    args: Vec<String>,
    elevated: bool,
    decoder: D,
}

impl Command<TextDecoder> {
    /// Create a command with the given base name, decoding stdout as text.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            args: Vec::new(),
            elevated: false,
            decoder: TextDecoder,
        }
    }
}

impl<D> Command<D> {
    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Require privilege escalation for this command.
    #[must_use]
    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    /// Swap the response decoder.
    #[must_use]
    pub fn decoder<E>(self, decoder: E) -> Command<E> {
        Command {
            base: self.base,
            args: self.args,
            elevated: self.elevated,
            decoder,
        }
    }
}

impl<D: ResponseDecoder> CommandDescriptor for Command<D> {
    type Response = D::Output;

    fn base_command(&self) -> &str {
        &self.base
    }

    fn arguments(&self) -> Vec<String> {
        self.args.clone()
    }

    fn requires_elevation(&self) -> bool {
        self.elevated
    }

    fn decode_response(&self, bytes: &[u8]) -> Option<D::Output> {
        self.decoder.decode(bytes)
    }
}
