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

/// Buffer received from the client after the verb.
pub struct UnparsedArgs(pub Vec<u8>);

/// A command found on the wire.
pub type Command<Verb, Args> = (Verb, Args);

/// Information known when the TCP/IP connection is accepted.
pub struct AcceptArgs {
    /// Peer address of the connection.
    pub client_addr: std::net::SocketAddr,
    /// Address of the listener which accepted the connection.
    pub server_addr: std::net::SocketAddr,
    /// Has the session been TLS-tunneled from the first byte ?
    pub secured: bool,
}

/// Name the client introduced itself with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientName {
    /// A fully qualified domain name.
    Domain(String),
    /// An IPv4 literal, `[a.b.c.d]`.
    Ip4(std::net::Ipv4Addr),
    /// An IPv6 literal, `[IPv6:...]`.
    Ip6(std::net::Ipv6Addr),
}

impl std::fmt::Display for ClientName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Ip4(ip) => write!(f, "[{ip}]"),
            Self::Ip6(ip) => write!(f, "[IPv6:{ip}]"),
        }
    }
}

/// Information received with the HELO command.
pub struct HeloArgs {
    /// Name of the client.
    pub client_name: String,
}

/// Information received with the EHLO command.
pub struct EhloArgs {
    /// Name of the client.
    pub client_name: ClientName,
}

/// Information received with the MAIL FROM command.
pub struct MailFromArgs {
    /// Sender address, `None` for the null reverse path `<>`.
    pub reverse_path: Option<String>,
}

/// Information received with the RCPT TO command.
pub struct RcptToArgs {
    /// Recipient address.
    pub forward_path: String,
}

/// Error while parsing the arguments of a command.
#[derive(Debug, thiserror::Error)]
pub enum ParseArgsError {
    /// Non-UTF8 buffer.
    #[error("buffer is not valid utf8: {0}")]
    InvalidUtf8(std::string::FromUtf8Error),
    /// Invalid IP literal.
    #[error("invalid address literal: {0}")]
    BadTypeAddr(std::net::AddrParseError),
    /// The command line is longer than the RFC allows.
    #[error("buffer is not supposed to be longer than {expected} bytes but got {got}")]
    BufferTooLong {
        /// Maximum size expected.
        expected: usize,
        /// Actual size.
        got: usize,
    },
    /// Anything else.
    #[error("invalid arguments")]
    InvalidArgs,
}

fn strip_line(value: &[u8]) -> Result<&[u8], ParseArgsError> {
    value
        .strip_suffix(b"\r\n")
        .ok_or(ParseArgsError::InvalidArgs)
}

fn trim_ascii_start(slice: &[u8]) -> &[u8] {
    let mut bytes = slice;
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Extract the `<path>` of a MAIL FROM / RCPT TO argument, ignoring any
/// trailing ESMTP parameters.
fn angle_path(value: &[u8]) -> Result<String, ParseArgsError> {
    let value = trim_ascii_start(value);

    let open = value
        .iter()
        .position(|c| *c == b'<')
        .ok_or(ParseArgsError::InvalidArgs)?;
    let close = value[open..]
        .iter()
        .position(|c| *c == b'>')
        .ok_or(ParseArgsError::InvalidArgs)?
        + open;

    String::from_utf8(value[open + 1..close].to_vec()).map_err(ParseArgsError::InvalidUtf8)
}

impl TryFrom<UnparsedArgs> for HeloArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let client_name = String::from_utf8(trim_ascii_start(strip_line(&value.0)?).to_vec())
            .map_err(ParseArgsError::InvalidUtf8)?;

        if client_name.is_empty() || client_name.contains(char::is_whitespace) {
            return Err(ParseArgsError::InvalidArgs);
        }

        Ok(Self { client_name })
    }
}

impl TryFrom<UnparsedArgs> for EhloArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = String::from_utf8(trim_ascii_start(strip_line(&value.0)?).to_vec())
            .map_err(ParseArgsError::InvalidUtf8)?;

        let client_name = match &value {
            ipv6 if ipv6.to_lowercase().starts_with("[ipv6:") && ipv6.ends_with(']') => {
                ClientName::Ip6(
                    ipv6["[IPv6:".len()..ipv6.len() - 1]
                        .parse::<std::net::Ipv6Addr>()
                        .map_err(ParseArgsError::BadTypeAddr)?,
                )
            }
            ipv4 if ipv4.starts_with('[') && ipv4.ends_with(']') => ClientName::Ip4(
                ipv4[1..ipv4.len() - 1]
                    .parse::<std::net::Ipv4Addr>()
                    .map_err(ParseArgsError::BadTypeAddr)?,
            ),
            domain if !domain.is_empty() && !domain.contains(char::is_whitespace) => {
                ClientName::Domain(domain.clone())
            }
            _ => return Err(ParseArgsError::InvalidArgs),
        };

        Ok(Self { client_name })
    }
}

impl TryFrom<UnparsedArgs> for MailFromArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let path = angle_path(strip_line(&value.0)?)?;

        Ok(Self {
            reverse_path: if path.is_empty() { None } else { Some(path) },
        })
    }
}

impl TryFrom<UnparsedArgs> for RcptToArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let path = angle_path(strip_line(&value.0)?)?;

        if path.is_empty() {
            return Err(ParseArgsError::InvalidArgs);
        }

        Ok(Self { forward_path: path })
    }
}

/// SMTP Command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::EnumVariantNames)]
pub enum Verb {
    /// Used to identify the SMTP client to the SMTP server. (historical)
    #[strum(serialize = "HELO ")]
    Helo,
    /// Used to identify the SMTP client to the SMTP server and request smtp
    /// extensions.
    #[strum(serialize = "EHLO ")]
    Ehlo,
    /// Initiate a mail transaction.
    #[strum(serialize = "MAIL FROM:")]
    MailFrom,
    /// Identify an individual recipient of the mail data.
    #[strum(serialize = "RCPT TO:")]
    RcptTo,
    /// Causes the mail data to be appended to the mail data buffer.
    #[strum(serialize = "DATA\r\n")]
    Data,
    /// The receiver MUST send a "221 OK" reply, and then close the
    /// transmission channel.
    #[strum(serialize = "QUIT\r\n")]
    Quit,
    /// Abort the current mail transaction.
    #[strum(serialize = "RSET\r\n")]
    Rset,
    /// Send helpful information to the client.
    #[strum(serialize = "HELP")]
    Help,
    /// Does not affect any parameters or previously entered commands.
    #[strum(serialize = "NOOP\r\n")]
    Noop,
    /// See "Transport Layer Security"
    /// <https://datatracker.ietf.org/doc/html/rfc3207>
    #[strum(serialize = "STARTTLS\r\n")]
    StartTls,
    /// Authentication, disabled on this receiver.
    /// <https://datatracker.ietf.org/doc/html/rfc4954>
    #[strum(serialize = "AUTH ")]
    Auth,
    /// Any other buffer received while expecting a command.
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> UnparsedArgs {
        UnparsedArgs(s.as_bytes().to_vec())
    }

    #[test]
    fn mail_from() {
        let parsed = MailFromArgs::try_from(args(" <sender@example.com>\r\n")).unwrap();
        assert_eq!(parsed.reverse_path.as_deref(), Some("sender@example.com"));
    }

    #[test]
    fn mail_from_null_path() {
        let parsed = MailFromArgs::try_from(args("<>\r\n")).unwrap();
        assert_eq!(parsed.reverse_path, None);
    }

    #[test]
    fn mail_from_with_esmtp_parameters() {
        let parsed = MailFromArgs::try_from(args(" <sender@example.com> SIZE=1024\r\n")).unwrap();
        assert_eq!(parsed.reverse_path.as_deref(), Some("sender@example.com"));
    }

    #[test]
    fn rcpt_to_empty_path_rejected() {
        assert!(RcptToArgs::try_from(args("<>\r\n")).is_err());
        assert!(RcptToArgs::try_from(args("no brackets\r\n")).is_err());
    }

    #[rstest::rstest]
    #[case("relay.example.com\r\n", ClientName::Domain("relay.example.com".to_string()))]
    #[case("[127.0.0.1]\r\n", ClientName::Ip4(std::net::Ipv4Addr::LOCALHOST))]
    #[case("[IPv6:::1]\r\n", ClientName::Ip6(std::net::Ipv6Addr::LOCALHOST))]
    fn ehlo(#[case] input: &str, #[case] expected: ClientName) {
        assert_eq!(EhloArgs::try_from(args(input)).unwrap().client_name, expected);
    }

    #[test]
    fn ehlo_rejects_spaces() {
        assert!(EhloArgs::try_from(args("not a domain\r\n")).is_err());
    }
}
