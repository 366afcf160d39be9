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

/// A reply code as defined in RFC5321.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct ReplyCode(pub u16);

impl ReplyCode {
    /// Is the code an error (4yz or 5yz) ?
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 / 100 >= 4
    }

    /// Is the code a transient failure (4yz) ?
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 / 100 == 4
    }

    /// Underlying value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SMTP message sent by the server to the client as defined in RFC5321#4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: ReplyCode,
    text: String,
}

impl Reply {
    ///
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code: ReplyCode(code),
            text: text.into(),
        }
    }

    ///
    #[must_use]
    pub const fn code(&self) -> ReplyCode {
        self.code
    }

    ///
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Render the reply to the wire, one `<code><sp>` prefix per line and
    /// `<code>-` continuation for all but the last.
    #[must_use]
    pub fn fold(&self) -> String {
        let lines = self
            .text
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();

        if lines.is_empty() {
            return format!("{} \r\n", self.code);
        }

        let last = lines.len() - 1;
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let sep = if i == last { ' ' } else { '-' };
                format!("{}{sep}{line}\r\n", self.code)
            })
            .collect()
    }
}

impl std::str::FromStr for Reply {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches("\r\n");
        let (code, text) = s
            .split_once(' ')
            .ok_or_else(|| anyhow::anyhow!("cannot parse reply {s:?}"))?;

        let code = code
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("invalid reply code in {s:?}"))?;
        anyhow::ensure!((200..=599).contains(&code), "reply code {code} out of range");

        Ok(Self::new(code, text.to_string()))
    }
}

impl serde::Serialize for Reply {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{} {}", self.code, self.text))
    }
}

impl<'de> serde::Deserialize<'de> for Reply {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let reply: Reply = "250 Ok".parse().unwrap();
        assert_eq!(reply.code().value(), 250);
        assert_eq!(reply.text(), "Ok");
        assert!(!reply.code().is_error());
    }

    #[test]
    fn parse_with_crlf() {
        let reply: Reply = "421 Too many connections, closing\r\n".parse().unwrap();
        assert_eq!(reply.code().value(), 421);
        assert!(reply.code().is_transient());
    }

    #[test]
    fn invalid() {
        assert!("hello world".parse::<Reply>().is_err());
        assert!("999 out of range".parse::<Reply>().is_err());
    }

    #[test]
    fn fold_single_line() {
        pretty_assertions::assert_eq!(
            Reply::new(250, "Ok").fold(),
            "250 Ok\r\n".to_string()
        );
    }

    #[test]
    fn fold_multi_line() {
        pretty_assertions::assert_eq!(
            Reply::new(250, "relay.example.com\r\n8BITMIME\r\nSMTPUTF8").fold(),
            "250-relay.example.com\r\n250-8BITMIME\r\n250 SMTPUTF8\r\n".to_string()
        );
    }
}
