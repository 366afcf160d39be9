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

use crate::ParsedEmail;

/// One durable unit of webhook work covering one parsed email.
///
/// Created when the SMTP `DATA` phase completes, mutated on each delivery
/// attempt, removed only once every targeted webhook has succeeded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Monotonically sortable identifier, `<millis>-<random hex>`.
    pub id: String,
    /// RFC3339 creation stamp.
    pub created_at: String,
    /// The email to deliver.
    pub parsed: ParsedEmail,
    /// After a partial failure, the subset of webhooks still owed delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_webhooks: Option<Vec<String>>,
    /// Total delivery attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Last delivery error, for the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// RFC3339 stamp of the last mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Task {
    /// A fresh task for `parsed`, not yet attempted.
    #[must_use]
    pub fn new(id: String, created_at: String, parsed: ParsedEmail) -> Self {
        Self {
            id,
            created_at,
            parsed,
            failed_webhooks: None,
            attempts: 0,
            last_error: None,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names() {
        let task = Task::new(
            "1700000000000-0123456789abcdef".to_string(),
            "2023-11-14T22:13:20Z".to_string(),
            ParsedEmail::default(),
        );

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["id"], "1700000000000-0123456789abcdef");
        assert_eq!(value["createdAt"], "2023-11-14T22:13:20Z");
        assert_eq!(value["attempts"], 0);
        assert!(value.get("failedWebhooks").is_none());
        assert!(value.get("lastError").is_none());
    }

    #[test]
    fn bytes_round_trip() {
        let mut task = Task::new(
            "1700000000000-00ff".to_string(),
            "2023-11-14T22:13:20Z".to_string(),
            ParsedEmail {
                subject: Some("round trip".to_string()),
                ..ParsedEmail::default()
            },
        );
        task.failed_webhooks = Some(vec!["https://a.example/hook".to_string()]);
        task.attempts = 3;
        task.last_error = Some("500 Internal Server Error".to_string());

        let bytes = serde_json::to_vec(&task).unwrap();
        pretty_assertions::assert_eq!(serde_json::from_slice::<Task>(&bytes).unwrap(), task);
    }
}
