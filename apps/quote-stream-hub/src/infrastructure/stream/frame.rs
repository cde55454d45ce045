//! STOMP 1.2 Framing
//!
//! One STOMP frame per WebSocket text message:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Header names and values escape `\\`, `\n`, `\r` and `:` except in
//! `CONNECT`/`CONNECTED` frames, as STOMP 1.2 requires. A message holding only
//! end-of-line characters is a heart-beat.

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// No command line.
    #[error("empty STOMP frame")]
    Empty,

    /// Unrecognized command.
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),

    /// Header line without a colon.
    #[error("malformed STOMP header: {0}")]
    MalformedHeader(String),

    /// Header block not terminated by a blank line.
    #[error("STOMP frame missing header terminator")]
    MissingHeaderTerminator,

    /// Invalid escape sequence in a header.
    #[error("invalid STOMP header escape: \\{0}")]
    InvalidEscape(char),
}

/// STOMP commands used by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompCommand {
    /// Client: open a session.
    Connect,
    /// Client: register a subscription.
    Subscribe,
    /// Client: drop a subscription.
    Unsubscribe,
    /// Client: close the session.
    Disconnect,
    /// Server: session established.
    Connected,
    /// Server: subscription payload.
    Message,
    /// Server: acknowledgement of a `receipt` header.
    Receipt,
    /// Server: failure report.
    Error,
}

impl StompCommand {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self, FrameError> {
        Ok(match line {
            "CONNECT" | "STOMP" => Self::Connect,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// A STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Frame command.
    pub command: StompCommand,
    /// Headers in wire order. On repeats the first occurrence wins.
    pub headers: Vec<(String, String)>,
    /// Body text.
    pub body: String,
}

impl StompFrame {
    /// Client heart-beat: a lone end-of-line.
    pub const HEART_BEAT: &'static str = "\n";

    /// Frame with no headers or body.
    #[must_use]
    pub const fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `CONNECT` frame.
    #[must_use]
    pub fn connect(host: &str, heart_beat: &str, authorization: Option<&str>) -> Self {
        let frame = Self::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", heart_beat);
        match authorization {
            Some(token) => frame.header("Authorization", format!("Bearer {token}")),
            None => frame,
        }
    }

    /// `SUBSCRIBE` frame.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(StompCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `UNSUBSCRIBE` frame.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(StompCommand::Unsubscribe).header("id", id)
    }

    /// `DISCONNECT` frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(StompCommand::Disconnect)
    }

    /// Serialize to wire text, NUL-terminated.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse wire text. `Ok(None)` is a heart-beat.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] for anything that is not a well-formed frame.
    pub fn decode(text: &str) -> Result<Option<Self>, FrameError> {
        let text = text.strip_suffix('\0').unwrap_or(text);
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, body) = match split_head(text) {
            Some(parts) => parts,
            None => {
                let head = text.trim_end_matches(['\r', '\n']);
                if head.contains('\n') {
                    return Err(FrameError::MissingHeaderTerminator);
                }
                (head, "")
            }
        };

        let mut lines = head.lines();
        let command_line = lines.next().ok_or(FrameError::Empty)?.trim_end_matches('\r');
        let command = StompCommand::parse(command_line)?;

        let escaped = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            let (name, value) = if escaped {
                (unescape(name)?, unescape(value)?)
            } else {
                (name.to_string(), value.to_string())
            };
            headers.push((name, value));
        }

        let body = match headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .and_then(|(_, len)| len.parse::<usize>().ok())
        {
            Some(len) if len <= body.len() && body.is_char_boundary(len) => &body[..len],
            _ => body,
        };

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

/// Split at the first blank line, LF or CRLF.
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|idx| (idx, 2));
    let crlf = text.find("\r\n\r\n").map(|idx| (idx, 4));
    let (idx, len) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if b.0 < a.0 {
                b
            } else {
                a
            }
        }
        (a, b) => a.or(b)?,
    };
    Some((&text[..idx], &text[idx + len..]))
}

fn push_escaped(out: &mut String, raw: &str) {
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::InvalidEscape('\\')),
        }
    }
    Ok(out)
}
