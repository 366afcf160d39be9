/*
 * vHook SMTP to webhook relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// Error codes considered recoverable: the peer went away or the network
/// hiccuped, the server must keep running and the dispatcher will retry.
const RECOVERABLE_CODES: &[&str] = &[
    "ECONNRESET",
    "EPIPE",
    "ETIMEDOUT",
    "ESOCKET",
    "ECONNABORTED",
    "EHOSTUNREACH",
    "ECONNREFUSED",
    "ENOTFOUND",
    "EAI_AGAIN",
    "ERR_STREAM_PREMATURE_CLOSE",
];

/// Message fragments of recoverable faults that carry no code, mostly TLS
/// negotiation noise from port scanners.
const RECOVERABLE_PATTERNS: &[&str] = &[
    "unknown protocol",
    "wrong version number",
    "tlsv1 alert",
    "read ETIMEDOUT",
    "socket hang up",
    "Client network socket disconnected",
];

/// Map an I/O error kind onto the conventional code vocabulary so that the
/// classifier sees a single namespace.
const fn io_kind_code(kind: std::io::ErrorKind) -> Option<&'static str> {
    match kind {
        std::io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
        std::io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
        std::io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        std::io::ErrorKind::BrokenPipe => Some("EPIPE"),
        std::io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
        std::io::ErrorKind::UnexpectedEof => Some("ERR_STREAM_PREMATURE_CLOSE"),
        _ => None,
    }
}

/// Is this fault a transient network condition ?
///
/// Walks the error chain and matches each layer's rendering against the
/// known code set and message fragments. Anything else is treated as a
/// programming or configuration error and escalates to shutdown.
#[must_use]
pub fn is_recoverable_network(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);

    while let Some(layer) = current {
        if let Some(io) = layer.downcast_ref::<std::io::Error>() {
            if io_kind_code(io.kind()).is_some() {
                return true;
            }
        }

        let rendered = layer.to_string();
        if RECOVERABLE_CODES.iter().any(|code| rendered.contains(code))
            || RECOVERABLE_PATTERNS
                .iter()
                .any(|pattern| rendered.contains(pattern))
        {
            return true;
        }

        current = layer.source();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(kind: std::io::ErrorKind, msg: &str) -> std::io::Error {
        std::io::Error::new(kind, msg.to_string())
    }

    #[rstest::rstest]
    #[case(std::io::ErrorKind::ConnectionReset, true)]
    #[case(std::io::ErrorKind::BrokenPipe, true)]
    #[case(std::io::ErrorKind::TimedOut, true)]
    #[case(std::io::ErrorKind::UnexpectedEof, true)]
    #[case(std::io::ErrorKind::PermissionDenied, false)]
    #[case(std::io::ErrorKind::NotFound, false)]
    fn io_kinds(#[case] kind: std::io::ErrorKind, #[case] recoverable: bool) {
        assert_eq!(
            is_recoverable_network(&boxed(kind, "io fault")),
            recoverable
        );
    }

    #[rstest::rstest]
    #[case("error:1408F10B:SSL routines: wrong version number", true)]
    #[case("tlsv1 alert unknown ca", true)]
    #[case("socket hang up", true)]
    #[case("getaddrinfo ENOTFOUND hooks.internal", true)]
    #[case("Client network socket disconnected before secure TLS connection", true)]
    #[case("assertion failed: queue invariant", false)]
    #[case("invalid configuration: missing bucket", false)]
    fn message_patterns(#[case] msg: &str, #[case] recoverable: bool) {
        assert_eq!(
            is_recoverable_network(&boxed(std::io::ErrorKind::Other, msg)),
            recoverable
        );
    }

    #[test]
    fn chained_source_is_inspected() {
        #[derive(Debug)]
        struct Wrapper(std::io::Error);

        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("webhook POST failed")
            }
        }

        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let error = Wrapper(boxed(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert!(is_recoverable_network(&error));
    }
}
