// Copyright 2025 corert contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::any::Any;
use std::fmt;
use std::io;

/// A tagged error: either a raw OS code, one of a fixed set of portable
/// system-level conditions, a domain-specific condition, or a captured
/// task panic.
#[derive(Debug)]
pub enum Error {
    /// An untranslated OS error code (`GetLastError` / raw `errno`).
    Native(i32),
    /// A portable, OS-independent system condition.
    System(SystemError),
    /// A condition specific to this crate's own protocols.
    Domain(DomainError),
    /// A task future panicked; the message is recovered from the payload
    /// where possible.
    Panic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemError(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    Eof,
    VersionMismatch,
}

impl Error {
    pub fn native(code: i32) -> Self {
        Error::Native(code)
    }

    pub fn system(code: i32) -> Self {
        Error::System(SystemError(code))
    }

    pub fn domain(kind: DomainError) -> Self {
        Error::Domain(kind)
    }

    pub fn last_os_error() -> Self {
        Error::native(io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    pub(crate) fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unhandled exception".to_string());
        Error::Panic(message)
    }

    pub fn value(&self) -> i32 {
        match self {
            Error::Native(code) => *code,
            Error::System(SystemError(code)) => *code,
            Error::Domain(DomainError::Eof) => 1,
            Error::Domain(DomainError::VersionMismatch) => 2,
            Error::Panic(_) => 0,
        }
    }
}

/// Trims leading/trailing whitespace and newlines, cuts at the first
/// sentence, and lowercases printable-ASCII characters up to the first
/// character outside that range — once one is seen, lowercasing stops
/// for the remainder of the string, matching the original's latching
/// `transform` rather than lowercasing every ASCII byte independently.
fn format_message(raw: &str) -> String {
    let trimmed = raw.trim_start_matches(['\r', '\n', ' ']);
    let first_sentence = trimmed.split('.').next().unwrap_or(trimmed);
    let trimmed = first_sentence.trim_end_matches(['\r', '\n', ' ']);
    let mut ascii = true;
    trimmed
        .chars()
        .map(|c| {
            if ascii && c >= ' ' && c <= '~' {
                c.to_ascii_lowercase()
            } else {
                ascii = false;
                c
            }
        })
        .collect()
}

fn domain_message(kind: DomainError) -> &'static str {
    match kind {
        DomainError::Eof => "end of file",
        DomainError::VersionMismatch => "version mismatch",
    }
}

/// A portable subset of the system category's message table. Anything
/// not named here falls back to the host's own message, passed through
/// the same normalization.
fn system_message(code: i32) -> String {
    #[cfg(unix)]
    {
        if let Some(name) = system_message_unix(code) {
            return name.to_string();
        }
    }
    format_message(&io::Error::from_raw_os_error(code).to_string())
}

#[cfg(unix)]
fn system_message_unix(code: i32) -> Option<&'static str> {
    Some(match code {
        libc::EADDRINUSE => "address already in use",
        libc::EADDRNOTAVAIL => "address not available",
        libc::EAFNOSUPPORT => "address family not supported",
        libc::EAGAIN => "operation would block",
        libc::EALREADY => "connection already in progress",
        libc::EBADF => "bad file descriptor",
        libc::EBUSY => "device or resource busy",
        libc::ECANCELED => "operation canceled",
        libc::ECONNABORTED => "connection aborted",
        libc::ECONNREFUSED => "connection refused",
        libc::ECONNRESET => "connection reset",
        libc::EDEADLK => "resource deadlock would occur",
        libc::EEXIST => "file exists",
        libc::EFAULT => "bad address",
        libc::EFBIG => "file too large",
        libc::EHOSTUNREACH => "host unreachable",
        libc::EINTR => "interrupted",
        libc::EINVAL => "invalid argument",
        libc::EIO => "io error",
        libc::EISCONN => "already connected",
        libc::EISDIR => "is a directory",
        libc::ELOOP => "too many symbolic link levels",
        libc::EMFILE => "too many open files",
        libc::ENAMETOOLONG => "filename too long",
        libc::ENETDOWN => "network is down",
        libc::ENETRESET => "network reset",
        libc::ENETUNREACH => "network unreachable",
        libc::ENOBUFS => "no buffer space available",
        libc::ENODEV => "no such device",
        libc::ENOENT => "no such file or directory",
        libc::ENOMEM => "not enough memory",
        libc::ENOSPC => "no space left on device",
        libc::ENOSYS => "function not implemented",
        libc::ENOTCONN => "not connected",
        libc::ENOTDIR => "not a directory",
        libc::ENOTEMPTY => "directory not empty",
        libc::ENOTSOCK => "not a socket",
        libc::EPERM => "operation not permitted",
        libc::EPIPE => "broken pipe",
        libc::EPROTONOSUPPORT => "protocol not supported",
        libc::EROFS => "read-only file system",
        libc::ETIMEDOUT => "timed out",
        libc::EXDEV => "cross-device link",
        _ => return None,
    })
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Native(code) => write!(
                f,
                "{} ({code})",
                format_message(&io::Error::from_raw_os_error(*code).to_string())
            ),
            Error::System(SystemError(code)) => write!(f, "{} ({code})", system_message(*code)),
            Error::Domain(kind) => write!(f, "{} ({})", domain_message(*kind), self.value()),
            Error::Panic(message) => write!(f, "unhandled exception: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<DomainError> for Error {
    fn from(kind: DomainError) -> Self {
        Error::Domain(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_domain_errors() {
        assert_eq!(Error::domain(DomainError::Eof).to_string(), "end of file (1)");
        assert_eq!(
            Error::domain(DomainError::VersionMismatch).to_string(),
            "version mismatch (2)"
        );
    }

    #[test]
    fn normalizes_raw_messages() {
        assert_eq!(format_message("Broken pipe.\r\n"), "broken pipe");
        assert_eq!(format_message("  No such file or directory"), "no such file or directory");
    }

    #[test]
    fn latches_off_lowercasing_after_first_non_printable_char() {
        // 'A'..'C' are lowercased while the latch is still on; the
        // embedded control character trips it, and 'D'..'F' afterwards
        // are left exactly as written, not just left non-ASCII.
        assert_eq!(format_message("ABC\u{1}DEF"), "abc\u{1}DEF");
    }

    #[test]
    fn captures_panic_payload() {
        let err = Error::panic(Box::new("boom"));
        assert_eq!(err.to_string(), "unhandled exception: boom");
    }

    #[test]
    #[cfg(unix)]
    fn formats_system_errors() {
        let err = Error::system(libc::ENOENT);
        assert_eq!(err.to_string(), format!("no such file or directory ({})", libc::ENOENT));
        assert_eq!(err.value(), libc::ENOENT);
    }

    #[test]
    fn system_error_falls_back_to_host_message_for_unlisted_codes() {
        // A code with no entry in `system_message_unix`'s table still
        // formats through the same normalization, via `io::Error`'s own
        // message, rather than panicking or returning an empty string.
        let err = Error::system(-1);
        assert!(!err.to_string().is_empty());
    }
}
