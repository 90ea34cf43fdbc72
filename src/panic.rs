//! Inspection of recovered panic payloads.
//!
//! A payload is whatever was handed to `panic!` or
//! [`std::panic::panic_any`]: usually a `&'static str` or a `String`, but a
//! handler that hits a failed socket write may well panic with the
//! `std::io::Error` itself.

use std::any::Any;
use std::error::Error as StdError;
use std::io;

const BROKEN_PIPE_PATTERNS: [&str; 2] = ["broken pipe", "connection reset by peer"];

/// Renders a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<io::Error>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        e.to_string()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

/// Reports whether a panic payload is a client disconnect: a broken pipe or
/// a connection reset by the peer.
///
/// Only I/O errors qualify, either as the payload itself or somewhere in the
/// source chain of a boxed error payload. Any other payload, including a
/// plain string that happens to mention a broken pipe, is not a disconnect.
pub fn is_broken_pipe(payload: &(dyn Any + Send)) -> bool {
    if let Some(e) = payload.downcast_ref::<io::Error>() {
        return is_disconnect(e);
    }
    if let Some(e) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        return is_broken_pipe_error(&**e);
    }
    false
}

/// Same test as [`is_broken_pipe`], applied to every error in `err`'s
/// source chain.
pub fn is_broken_pipe_error(err: &(dyn StdError + 'static)) -> bool {
    let mut next = Some(err);
    while let Some(e) = next {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if is_disconnect(io) {
                return true;
            }
        }
        next = e.source();
    }
    false
}

fn is_disconnect(err: &io::Error) -> bool {
    if matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) {
        return true;
    }
    let Some(cause) = err.get_ref() else {
        return false;
    };
    let msg = cause.to_string().to_lowercase();
    BROKEN_PIPE_PATTERNS.iter().any(|p| msg.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Syscall(&'static str);

    impl fmt::Display for Syscall {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "write: {}", self.0)
        }
    }

    impl StdError for Syscall {}

    fn wrapped(msg: &'static str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, Syscall(msg))
    }

    #[test]
    fn wrapped_syscall_messages_match_case_insensitively() {
        assert!(is_broken_pipe(&wrapped("Broken Pipe")));
        assert!(is_broken_pipe(&wrapped("CONNECTION RESET BY PEER")));
        assert!(!is_broken_pipe(&wrapped("permission denied")));
    }

    #[test]
    fn os_error_kinds_match() {
        assert!(is_broken_pipe(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_broken_pipe(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_broken_pipe(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn io_error_without_cause_is_not_a_disconnect() {
        assert!(!is_broken_pipe(&io::Error::from(io::ErrorKind::Other)));
    }

    #[test]
    fn strings_never_match() {
        assert!(!is_broken_pipe(&"broken pipe"));
        assert!(!is_broken_pipe(&String::from("connection reset by peer")));
        assert!(!is_broken_pipe(&42u8));
    }

    #[test]
    fn boxed_errors_are_searched_through_their_sources() {
        let boxed: Box<dyn StdError + Send + Sync> = Box::new(wrapped("broken pipe"));
        assert!(is_broken_pipe(&boxed));
    }

    #[test]
    fn messages_for_common_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&wrapped("broken pipe")), "write: broken pipe");
        assert_eq!(panic_message(&1u64), "Box<dyn Any>");
    }
}
