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

/// A single mailbox of an address header.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Mailbox {
    /// Display name, if the header carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The `local-part@domain` address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Mailbox {
    /// Domain of the address, when there is one.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.address
            .as_deref()
            .and_then(|addr| addr.rsplit_once('@'))
            .map(|(_, domain)| domain)
    }
}

/// An address header (`From`, `To`, `Cc`) as both display text and
/// structured mailboxes.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AddressList {
    /// The header rendered back to text, e.g. `"Jane <jane@example.com>"`.
    pub text: String,
    /// The individual mailboxes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<Mailbox>,
}

impl AddressList {
    /// Build a list from mailboxes, deriving the display text.
    #[must_use]
    pub fn from_mailboxes(value: Vec<Mailbox>) -> Self {
        let text = value
            .iter()
            .map(|mbox| match (&mbox.name, &mbox.address) {
                (Some(name), Some(address)) => format!("{name} <{address}>"),
                (None, Some(address)) => address.clone(),
                (Some(name), None) => name.clone(),
                (None, None) => String::new(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        Self { text, value }
    }

    /// Every address of the list.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.value.iter().filter_map(|mbox| mbox.address.as_deref())
    }
}

/// Case-insensitive multi-map of the message headers.
///
/// Header ordering is preserved, lookup is by ASCII-case-insensitive name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers(pub Vec<(String, String)>);

impl Headers {
    /// All values carried by `name`, in message order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// First value carried by `name`.
    #[must_use]
    pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.get_all(name).next()
    }

    /// Every value of `name` joined with a space, the form used for
    /// substring policies over `Authentication-Results`.
    #[must_use]
    pub fn concatenated(&self, name: &str) -> String {
        self.get_all(name).collect::<Vec<_>>().join(" ")
    }
}

impl serde::Serialize for Headers {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut grouped = Vec::<(String, Vec<&str>)>::new();
        for (name, value) in &self.0 {
            let name = name.to_lowercase();
            match grouped.iter_mut().find(|(key, _)| *key == name) {
                Some((_, values)) => values.push(value),
                None => grouped.push((name, vec![value])),
            }
        }

        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(grouped.len()))?;
        for (name, values) in grouped {
            if let [single] = values.as_slice() {
                map.serialize_entry(&name, single)?;
            } else {
                map.serialize_entry(&name, &values)?;
            }
        }
        map.end()
    }
}

impl<'de> serde::Deserialize<'de> for Headers {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct HeadersVisitor;

        impl<'de> serde::de::Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a map of header names to a value or a list of values")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                #[derive(serde::Deserialize)]
                #[serde(untagged)]
                enum OneOrMany {
                    One(String),
                    Many(Vec<String>),
                }

                let mut headers = Vec::new();
                while let Some((name, value)) = map.next_entry::<String, OneOrMany>()? {
                    match value {
                        OneOrMany::One(value) => headers.push((name, value)),
                        OneOrMany::Many(values) => {
                            headers.extend(values.into_iter().map(|value| (name.clone(), value)));
                        }
                    }
                }
                Ok(Headers(headers))
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Projection of a stored attachment exposed to the webhook consumer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    /// Original filename from the MIME part.
    pub filename: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Payload length in bytes.
    pub size: usize,
    /// Durable URL when the primary store accepted the upload.
    pub location: Option<String>,
    /// `"s3"` or `"local"`.
    pub storage_type: String,
    /// Operator-facing note for locally staged payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Identifier of the locally staged payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

/// An attachment refused by the size policy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAttachment {
    /// Original filename from the MIME part.
    pub filename: String,
    /// Payload length in bytes.
    pub size: usize,
    /// Why it was refused.
    pub reason: String,
}

/// Attachment accounting, included only when the message carried at least
/// one attachment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSummary {
    /// How many attachments the message carried.
    pub total: usize,
    /// How many reached the primary store.
    pub uploaded_to_s3: usize,
    /// How many were staged on the local disk.
    pub stored_locally: usize,
    /// How many were refused by the size policy.
    pub skipped: usize,
}

/// The parsed email, which is also the JSON body posted to webhooks.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEmail {
    /// `From` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<AddressList>,
    /// `To` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<AddressList>,
    /// `Cc` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<AddressList>,
    /// `Subject` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// `Date` header, RFC3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Every header of the message.
    #[serde(default)]
    pub headers: Headers,
    /// First text/plain body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// First text/html body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Stored attachments (primary or local), skipped ones excluded.
    #[serde(default)]
    pub attachment_info: Vec<AttachmentInfo>,
    /// Attachments refused by the size policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_attachments: Vec<SkippedAttachment>,
    /// Accounting, present only when attachments existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_summary: Option<StorageSummary>,
}

impl ParsedEmail {
    /// `"true"`/`"false"` value exposed to the rule field `hasAttachments`.
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        !self.attachment_info.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = Headers(vec![
            ("Subject".to_string(), "hello".to_string()),
            ("X-Custom".to_string(), "a".to_string()),
            ("x-custom".to_string(), "b".to_string()),
        ]);

        assert_eq!(headers.get("subject"), Some("hello"));
        assert_eq!(headers.get_all("X-CUSTOM").collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(headers.concatenated("x-custom"), "a b");
    }

    #[test]
    fn headers_serialize_as_multimap() {
        let headers = Headers(vec![
            ("Received".to_string(), "one".to_string()),
            ("Subject".to_string(), "hello".to_string()),
            ("received".to_string(), "two".to_string()),
        ]);

        pretty_assertions::assert_eq!(
            serde_json::to_value(&headers).unwrap(),
            serde_json::json!({ "received": ["one", "two"], "subject": "hello" })
        );
    }

    #[test]
    fn headers_round_trip() {
        let headers = Headers(vec![
            ("received".to_string(), "one".to_string()),
            ("received".to_string(), "two".to_string()),
            ("subject".to_string(), "hi".to_string()),
        ]);

        let json = serde_json::to_string(&headers).unwrap();
        let back: Headers = serde_json::from_str(&json).unwrap();
        pretty_assertions::assert_eq!(back, headers);
    }

    #[test]
    fn storage_summary_omitted_without_attachments() {
        let email = ParsedEmail {
            subject: Some("no attachments".to_string()),
            ..ParsedEmail::default()
        };

        let value = serde_json::to_value(&email).unwrap();
        assert!(value.get("storageSummary").is_none());
        assert!(value.get("skippedAttachments").is_none());
    }

    #[test]
    fn address_list_text() {
        let list = AddressList::from_mailboxes(vec![
            Mailbox {
                name: Some("Jane".to_string()),
                address: Some("jane@example.com".to_string()),
            },
            Mailbox {
                name: None,
                address: Some("ops@example.com".to_string()),
            },
        ]);

        assert_eq!(list.text, "Jane <jane@example.com>, ops@example.com");
        assert_eq!(list.value[0].domain(), Some("example.com"));
    }
}
