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
use mail_parser::MimeHeaders;
use vhook_common::{AddressList, Attachment, Headers, Mailbox, ParsedEmail};

/// A message decoded from the `DATA` stream: the structured email plus the
/// attachment payloads, which go to the storage tier rather than into the
/// webhook body.
#[derive(Debug)]
pub struct ExtractedMail {
    /// Everything but the attachment bytes.
    pub email: ParsedEmail,
    /// The decoded attachment payloads.
    pub attachments: Vec<Attachment>,
}

fn address_list(address: Option<&mail_parser::Address<'_>>) -> Option<AddressList> {
    let mailboxes = address?
        .iter()
        .map(|addr| Mailbox {
            name: addr.name().map(str::to_string),
            address: addr.address().map(str::to_string),
        })
        .collect::<Vec<_>>();

    if mailboxes.is_empty() {
        return None;
    }
    Some(AddressList::from_mailboxes(mailboxes))
}

fn content_type_of(part: &mail_parser::MessagePart<'_>) -> String {
    part.content_type().map_or_else(
        || "application/octet-stream".to_string(),
        |ct| match ct.subtype() {
            Some(subtype) => format!("{}/{subtype}", ct.ctype()),
            None => ct.ctype().to_string(),
        },
    )
}

/// Parse the raw message received between `DATA` and the final dot.
///
/// `None` means the MIME stream is beyond repair and the session should
/// answer 451; individual malformed parts degrade silently instead.
#[must_use]
pub fn extract(raw: &[u8]) -> Option<ExtractedMail> {
    let message = mail_parser::MessageParser::default().parse(raw)?;
    // a headerless blob is not an email
    message.headers_raw().next()?;

    let headers = Headers(
        message
            .headers_raw()
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect(),
    );

    let attachments = message
        .attachments()
        .map(|part| Attachment {
            filename: part
                .attachment_name()
                .unwrap_or("attachment")
                .to_string(),
            content_type: content_type_of(part),
            content: part.contents().to_vec(),
        })
        .collect();

    let email = ParsedEmail {
        from: address_list(message.from()),
        to: address_list(message.to()),
        cc: address_list(message.cc()),
        subject: message.subject().map(str::to_string),
        date: message.date().map(mail_parser::DateTime::to_rfc3339),
        headers,
        text: message.body_text(0).map(|text| text.to_string()),
        html: message.body_html(0).map(|html| html.to_string()),
        attachment_info: vec![],
        skipped_attachments: vec![],
        storage_summary: None,
    };

    Some(ExtractedMail { email, attachments })
}
