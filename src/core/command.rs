use crate::proto::frame::Frame;
use crate::{Error, Result};
use bytes::Bytes;

/// An immutable description of a Redis command.
///
/// A spec carries the command name and its behavior classifier; it is created
/// once (usually as a constant) and shared by every invocation. Specs never
/// change after construction.
///
/// # Example
///
/// ```
/// use shardis::core::command::CommandSpec;
///
/// const DEL: CommandSpec = CommandSpec::new("DEL");
/// const BLPOP: CommandSpec = CommandSpec::blocking("BLPOP");
///
/// assert!(!DEL.is_blocking());
/// assert!(BLPOP.is_blocking());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    name: &'static str,
    blocking_tail_timeout: bool,
}

impl CommandSpec {
    /// Creates a spec for a regular command.
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            blocking_tail_timeout: false,
        }
    }

    /// Creates a spec for a command whose last argument is a server-side
    /// wait duration in seconds (the BLPOP family).
    #[inline]
    pub const fn blocking(name: &'static str) -> Self {
        Self {
            name,
            blocking_tail_timeout: true,
        }
    }

    /// Returns the command name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if the command's last argument encodes a server-side
    /// wait duration.
    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.blocking_tail_timeout
    }
}

/// A [`CommandSpec`] bound to concrete arguments, ready to be sent.
///
/// Invocations are built once per call and cloned per attempt; the dispatch
/// engine preserves argument identity across retries and redirects.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    spec: CommandSpec,
    args: Vec<Bytes>,
}

impl CommandInvocation {
    /// Creates an invocation with no arguments.
    #[inline]
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            args: Vec::new(),
        }
    }

    /// Appends an argument.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Returns the command spec.
    #[inline]
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Returns the bound arguments.
    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Converts the invocation to a RESP Array frame.
    pub fn into_frame(self) -> Frame {
        let mut parts = Vec::with_capacity(1 + self.args.len());
        parts.push(Frame::BulkString(Some(Bytes::from_static(
            self.spec.name.as_bytes(),
        ))));
        parts.extend(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b))),
        );
        Frame::Array(parts)
    }

    /// Parses the trailing server-side wait argument of a blocking command,
    /// in seconds. Returns None for non-blocking commands or when the last
    /// argument is not a number.
    pub fn trailing_wait_secs(&self) -> Option<u64> {
        if !self.spec.is_blocking() {
            return None;
        }
        let last = self.args.last()?;
        std::str::from_utf8(last).ok()?.parse::<u64>().ok()
    }
}

/// Creates a GET invocation.
#[inline]
pub fn get(key: impl Into<Bytes>) -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("GET")).arg(key)
}

/// Creates a SET invocation.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("SET")).arg(key).arg(value)
}

/// Creates a single-key DEL invocation.
#[inline]
pub fn del(key: impl Into<Bytes>) -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("DEL")).arg(key)
}

/// Creates a multi-key DEL invocation.
#[inline]
pub fn del_many<I, T>(keys: I) -> CommandInvocation
where
    I: IntoIterator<Item = T>,
    T: Into<Bytes>,
{
    let mut inv = CommandInvocation::new(CommandSpec::new("DEL"));
    for key in keys {
        inv = inv.arg(key);
    }
    inv
}

/// Creates a DBSIZE invocation.
#[inline]
pub fn dbsize() -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("DBSIZE"))
}

/// Creates a FLUSHDB invocation.
#[inline]
pub fn flushdb() -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("FLUSHDB"))
}

/// Creates a FLUSHALL invocation.
#[inline]
pub fn flushall() -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("FLUSHALL"))
}

/// Creates a KEYS invocation.
#[inline]
pub fn keys(pattern: impl Into<Bytes>) -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("KEYS")).arg(pattern)
}

/// Creates a SCAN invocation with an optional MATCH pattern.
pub fn scan(cursor: u64, pattern: Option<&str>) -> CommandInvocation {
    let mut inv =
        CommandInvocation::new(CommandSpec::new("SCAN")).arg(cursor.to_string());
    if let Some(p) = pattern {
        inv = inv.arg("MATCH").arg(p.to_string());
    }
    inv
}

/// Creates a RANDOMKEY invocation.
#[inline]
pub fn random_key() -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("RANDOMKEY"))
}

/// Creates an ASKING invocation.
///
/// Sent as the first element of an atomic batch when following an ASK
/// redirect; it tells the target node to accept the next command even
/// though the slot is still migrating.
#[inline]
pub fn asking() -> CommandInvocation {
    CommandInvocation::new(CommandSpec::new("ASKING"))
}

/// Creates an EVAL invocation: script, key count, keys, then arguments.
pub fn eval<K, A>(script: &str, script_keys: &[K], script_args: &[A]) -> CommandInvocation
where
    K: AsRef<str>,
    A: Clone + Into<Bytes>,
{
    let mut inv = CommandInvocation::new(CommandSpec::new("EVAL"))
        .arg(script.to_string())
        .arg(script_keys.len().to_string());
    for key in script_keys {
        inv = inv.arg(key.as_ref().to_string());
    }
    for a in script_args {
        inv = inv.arg(a.clone());
    }
    inv
}

/// Creates a BLPOP invocation with a server-side wait in seconds.
///
/// A wait of 0 means the server may block indefinitely.
pub fn blpop<I, T>(pop_keys: I, wait_secs: u64) -> CommandInvocation
where
    I: IntoIterator<Item = T>,
    T: Into<Bytes>,
{
    let mut inv = CommandInvocation::new(CommandSpec::blocking("BLPOP"));
    for key in pop_keys {
        inv = inv.arg(key);
    }
    inv.arg(wait_secs.to_string())
}

/// Creates a BRPOP invocation with a server-side wait in seconds.
pub fn brpop<I, T>(pop_keys: I, wait_secs: u64) -> CommandInvocation
where
    I: IntoIterator<Item = T>,
    T: Into<Bytes>,
{
    let mut inv = CommandInvocation::new(CommandSpec::blocking("BRPOP"));
    for key in pop_keys {
        inv = inv.arg(key);
    }
    inv.arg(wait_secs.to_string())
}

/// Converts a reply frame to an integer.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the frame is not an integer reply.
pub fn frame_to_int(frame: Frame) -> Result<i64> {
    match frame {
        Frame::Integer(n) => Ok(n),
        other => Err(Error::Protocol {
            message: format!("expected integer reply, got {:?}", other),
        }),
    }
}

/// Converts a reply frame to an optional bulk payload.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the frame is neither a bulk string nor Null.
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>> {
    match frame {
        Frame::BulkString(data) => Ok(data),
        Frame::Null => Ok(None),
        other => Err(Error::Protocol {
            message: format!("expected bulk string reply, got {:?}", other),
        }),
    }
}

/// Converts an array-of-bulk-strings reply to UTF-8 key names.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the frame is not an array.
pub fn frame_to_keys(frame: Frame) -> Result<Vec<String>> {
    let items = match frame {
        Frame::Array(items) => items,
        Frame::Null => Vec::new(),
        other => {
            return Err(Error::Protocol {
                message: format!("expected array reply, got {:?}", other),
            })
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if let Frame::BulkString(Some(data)) = item {
            out.push(String::from_utf8_lossy(&data).into_owned());
        }
    }
    Ok(out)
}
