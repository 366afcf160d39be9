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
use crate::rule::{Condition, Rule};
use vhook_common::ParsedEmail;

/// Priority reported for the synthesized default-URL target.
///
/// Distinct from [`crate::DEFAULT_RULE_PRIORITY`] on purpose: existing
/// consumers key on both values.
pub const DEFAULT_TARGET_PRIORITY: i64 = 9999;

/// One entry of the fan-out decision, also serialized as `_webhookMeta`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// URL to POST to.
    pub webhook: String,
    /// Name of the rule that selected it, `"default"` for the fallback.
    pub rule_name: String,
    /// Priority of that rule.
    pub priority: i64,
}

/// The webhook router: a sorted rule list plus the default URL.
#[derive(Debug)]
pub struct Router {
    rules: Vec<Rule>,
    default_url: Option<String>,
    allow_insecure_http: bool,
}

impl Router {
    /// Build a router from the raw `WEBHOOK_RULES` value and the default
    /// URL. Malformed rules degrade to an empty list, never to an error.
    #[must_use]
    pub fn new(
        rules: Option<&serde_json::Value>,
        default_url: Option<String>,
        allow_insecure_http: bool,
    ) -> Self {
        let rules = Rule::ingest(rules);
        tracing::debug!(count = rules.len(), "Webhook rules loaded.");

        Self {
            rules,
            default_url,
            allow_insecure_http,
        }
    }

    /// Evaluate the rule set against `email`.
    ///
    /// Walks the priority-sorted rules appending every match, stops after a
    /// matching rule with `stop_processing`, falls back to the default URL
    /// when nothing matched, then drops plain-HTTP targets unless insecure
    /// HTTP is allowed.
    #[must_use]
    pub fn decide(&self, email: &ParsedEmail) -> Vec<Target> {
        let email_json = serde_json::to_value(email).unwrap_or(serde_json::Value::Null);

        let mut targets = vec![];
        for rule in &self.rules {
            if rule_matches(rule, email, &email_json) {
                targets.push(Target {
                    webhook: rule.webhook.clone(),
                    rule_name: rule.name.clone(),
                    priority: rule.priority,
                });

                if rule.stop_processing {
                    break;
                }
            }
        }

        if targets.is_empty() {
            if let Some(default_url) = &self.default_url {
                targets.push(Target {
                    webhook: default_url.clone(),
                    rule_name: "default".to_string(),
                    priority: DEFAULT_TARGET_PRIORITY,
                });
            }
        }

        targets.retain(|target| {
            let insecure = target.webhook.to_lowercase().starts_with("http://");
            if insecure && !self.allow_insecure_http {
                tracing::warn!(
                    webhook = %target.webhook,
                    rule = %target.rule_name,
                    "Dropping insecure webhook target."
                );
                return false;
            }
            true
        });

        targets
    }
}

/// All conditions must hold; a rule without conditions always matches.
fn rule_matches(rule: &Rule, email: &ParsedEmail, email_json: &serde_json::Value) -> bool {
    rule.conditions.iter().all(|condition| match condition {
        Condition::Field { field, matcher } => {
            resolve_values(email, email_json, field)
                .iter()
                .any(|value| matcher.matches(value))
        }
        Condition::Header { name, matcher } => {
            email.headers.get_all(name).any(|value| matcher.matches(value))
        }
    })
}

/// Resolve a rule field to the list of candidate strings; a matcher applies
/// to any element.
fn resolve_values(email: &ParsedEmail, email_json: &serde_json::Value, field: &str) -> Vec<String> {
    if field == "hasAttachments" {
        return vec![email.has_attachments().to_string()];
    }

    let mut node = email_json;
    for segment in field.split('.') {
        match node.get(segment) {
            Some(next) => node = next,
            None => return vec![],
        }
    }

    flatten(node)
}

/// Accepts the shapes an email field can take: a string, `{text}`,
/// `{address}`, `{value: [{address}, ...]}`, or a list of those.
fn flatten(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Bool(b) => vec![b.to_string()],
        serde_json::Value::Number(n) => vec![n.to_string()],
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(text)) = map.get("text") {
                if !text.is_empty() {
                    return vec![text.clone()];
                }
            }
            if let Some(serde_json::Value::String(address)) = map.get("address") {
                return vec![address.clone()];
            }
            if let Some(items @ serde_json::Value::Array(_)) = map.get("value") {
                return flatten(items);
            }
            vec![]
        }
        serde_json::Value::Array(items) => items.iter().flat_map(flatten).collect(),
        serde_json::Value::Null => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vhook_common::{AddressList, AttachmentInfo, Headers, Mailbox};

    fn email() -> ParsedEmail {
        ParsedEmail {
            from: Some(AddressList::from_mailboxes(vec![Mailbox {
                name: None,
                address: Some("jane@example.com".to_string()),
            }])),
            to: Some(AddressList::from_mailboxes(vec![
                Mailbox {
                    name: None,
                    address: Some("support@relay.example".to_string()),
                },
                Mailbox {
                    name: None,
                    address: Some("sales@relay.example".to_string()),
                },
            ])),
            subject: Some("test message".to_string()),
            headers: Headers(vec![
                ("X-Priority".to_string(), "1".to_string()),
                ("Authentication-Results".to_string(), "spf=pass".to_string()),
            ]),
            ..ParsedEmail::default()
        }
    }

    fn router(rules: serde_json::Value, default_url: Option<&str>) -> Router {
        Router::new(Some(&rules), default_url.map(str::to_string), false)
    }

    #[test]
    fn default_only() {
        let router = Router::new(None, Some("https://d.example/h".to_string()), false);

        pretty_assertions::assert_eq!(
            router.decide(&email()),
            vec![Target {
                webhook: "https://d.example/h".to_string(),
                rule_name: "default".to_string(),
                priority: DEFAULT_TARGET_PRIORITY,
            }]
        );
    }

    #[test]
    fn empty_rules_and_no_default_is_empty() {
        let router = Router::new(None, None, false);
        assert!(router.decide(&email()).is_empty());
    }

    #[test]
    fn stop_processing_cuts_the_fan_out() {
        let router = router(
            serde_json::json!([
                { "name": "A", "priority": 1, "conditions": { "subject": "*test*" },
                  "webhook": "https://a.example/h", "stopProcessing": true },
                { "name": "B", "priority": 2, "conditions": { "subject": "*test*" },
                  "webhook": "https://b.example/h" },
            ]),
            None,
        );

        let decision = router.decide(&email());
        assert_eq!(decision.len(), 1);
        assert_eq!(decision[0].rule_name, "A");
    }

    #[test]
    fn matches_are_ordered_by_priority() {
        let router = router(
            serde_json::json!([
                { "name": "late", "priority": 20, "conditions": {},
                  "webhook": "https://late.example/h" },
                { "name": "early", "priority": 1, "conditions": {},
                  "webhook": "https://early.example/h" },
            ]),
            None,
        );

        let names = router
            .decide(&email())
            .into_iter()
            .map(|t| t.rule_name)
            .collect::<Vec<_>>();
        pretty_assertions::assert_eq!(names, ["early", "late"]);
    }

    #[test]
    fn empty_conditions_always_match() {
        let router = router(
            serde_json::json!([{ "name": "all", "webhook": "https://all.example/h" }]),
            None,
        );
        assert_eq!(router.decide(&email()).len(), 1);
    }

    #[test]
    fn list_fields_match_any_element() {
        let router = router(
            serde_json::json!([
                { "name": "sales", "conditions": { "to": "*sales@relay.example*" },
                  "webhook": "https://sales.example/h" },
            ]),
            None,
        );
        assert_eq!(router.decide(&email()).len(), 1);
    }

    #[test]
    fn all_conditions_must_hold() {
        let router = router(
            serde_json::json!([
                { "name": "both", "webhook": "https://both.example/h",
                  "conditions": { "subject": "*test*", "from": "*@nomatch.example" } },
            ]),
            Some("https://d.example/h"),
        );

        let decision = router.decide(&email());
        assert_eq!(decision[0].rule_name, "default");
    }

    #[test]
    fn header_condition() {
        let router = router(
            serde_json::json!([
                { "name": "urgent", "webhook": "https://urgent.example/h",
                  "conditions": { "header": { "name": "x-priority", "value": "1" } } },
            ]),
            None,
        );
        assert_eq!(router.decide(&email()).len(), 1);
    }

    #[test]
    fn has_attachments_condition() {
        let router = router(
            serde_json::json!([
                { "name": "files", "webhook": "https://files.example/h",
                  "conditions": { "hasAttachments": "true" } },
            ]),
            Some("https://d.example/h"),
        );

        assert_eq!(router.decide(&email())[0].rule_name, "default");

        let mut with_attachment = email();
        with_attachment.attachment_info.push(AttachmentInfo {
            filename: "doc.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 1024,
            location: Some("https://bucket.example/doc.pdf".to_string()),
            storage_type: "s3".to_string(),
            note: None,
            attachment_id: None,
        });
        assert_eq!(router.decide(&with_attachment)[0].rule_name, "files");
    }

    #[test]
    fn dot_path_fallback() {
        let router = router(
            serde_json::json!([
                { "name": "by-path", "webhook": "https://path.example/h",
                  "conditions": { "storageSummary.total": "2" } },
            ]),
            None,
        );

        let mut email = email();
        assert!(router.decide(&email).is_empty());

        email.storage_summary = Some(vhook_common::StorageSummary {
            total: 2,
            uploaded_to_s3: 2,
            stored_locally: 0,
            skipped: 0,
        });
        assert_eq!(router.decide(&email).len(), 1);
    }

    #[test]
    fn invalid_regex_fails_only_its_condition() {
        let router = router(
            serde_json::json!([
                { "name": "broken", "webhook": "https://broken.example/h",
                  "conditions": { "subject": "/((/" } },
                { "name": "working", "webhook": "https://working.example/h",
                  "conditions": { "subject": "*test*" } },
            ]),
            None,
        );

        let decision = router.decide(&email());
        assert_eq!(decision.len(), 1);
        assert_eq!(decision[0].rule_name, "working");
    }

    #[test]
    fn insecure_http_is_dropped() {
        let router = router(
            serde_json::json!([
                { "name": "plain", "webhook": "http://plain.example/h",
                  "conditions": { "subject": "*test*" } },
            ]),
            None,
        );
        assert!(router.decide(&email()).is_empty());
    }

    #[test]
    fn insecure_http_default_yields_empty_decision() {
        let router = Router::new(None, Some("http://plain.example/h".to_string()), false);
        assert!(router.decide(&email()).is_empty());
    }

    #[test]
    fn insecure_http_allowed_when_configured() {
        let router = Router::new(None, Some("http://plain.example/h".to_string()), true);
        assert_eq!(router.decide(&email()).len(), 1);
    }

    #[test]
    fn decision_is_deterministic() {
        let rules = serde_json::json!([
            { "name": "A", "conditions": { "subject": "*test*" }, "webhook": "https://a.example/h" },
        ]);
        let router = router(rules, Some("https://d.example/h"));

        let email = email();
        let first = router.decide(&email);
        let second = router.decide(&email);
        pretty_assertions::assert_eq!(first, second);
    }

    #[test]
    fn webhook_meta_serialization() {
        let target = Target {
            webhook: "https://d.example/h".to_string(),
            rule_name: "default".to_string(),
            priority: DEFAULT_TARGET_PRIORITY,
        };

        pretty_assertions::assert_eq!(
            serde_json::to_value(&target).unwrap(),
            serde_json::json!({
                "webhook": "https://d.example/h",
                "ruleName": "default",
                "priority": 9999,
            })
        );
    }
}
