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
use crate::matcher::Matcher;

/// Priority assigned to rules that do not declare one.
pub const DEFAULT_RULE_PRIORITY: i64 = 999;

/// One condition of a rule, precompiled.
#[derive(Debug, Clone)]
pub(crate) enum Condition {
    /// Match a resolved email field against a value matcher.
    Field {
        /// `from`, `subject`, `hasAttachments`, or a dot path.
        field: String,
        matcher: Matcher,
    },
    /// Match one header of the multi-map.
    Header { name: String, matcher: Matcher },
}

/// A routing rule, compiled from its JSON form.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Name reported in `_webhookMeta`.
    pub name: String,
    /// Target URL.
    pub webhook: String,
    /// Ascending evaluation order, 999 when unspecified.
    pub priority: i64,
    /// A matching rule with this flag ends the evaluation.
    pub stop_processing: bool,
    pub(crate) conditions: Vec<Condition>,
}

/// The JSON shape of one rule inside `WEBHOOK_RULES`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    #[serde(default)]
    name: Option<String>,
    webhook: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    stop_processing: bool,
    #[serde(default)]
    conditions: serde_json::Map<String, serde_json::Value>,
}

/// The JSON shape of a header condition value.
#[derive(Debug, serde::Deserialize)]
struct RawHeaderCondition {
    name: String,
    value: String,
}

impl Rule {
    fn compile(index: usize, raw: RawRule) -> Self {
        let conditions = raw
            .conditions
            .into_iter()
            .map(|(field, value)| {
                if field == "header" {
                    match serde_json::from_value::<RawHeaderCondition>(value.clone()) {
                        Ok(header) => Condition::Header {
                            name: header.name,
                            matcher: Matcher::compile(&header.value),
                        },
                        Err(_) => {
                            tracing::warn!(?value, "Malformed header condition, never matches.");
                            Condition::Header {
                                name: String::new(),
                                matcher: Matcher::Invalid,
                            }
                        }
                    }
                } else {
                    let matcher = match &value {
                        serde_json::Value::String(s) => Matcher::compile(s),
                        serde_json::Value::Bool(b) => Matcher::compile(&b.to_string()),
                        serde_json::Value::Number(n) => Matcher::compile(&n.to_string()),
                        _ => {
                            tracing::warn!(field, ?value, "Unsupported condition value.");
                            Matcher::Invalid
                        }
                    };
                    Condition::Field { field, matcher }
                }
            })
            .collect();

        Self {
            name: raw.name.unwrap_or_else(|| format!("rule-{index}")),
            webhook: raw.webhook,
            priority: raw.priority.unwrap_or(DEFAULT_RULE_PRIORITY),
            stop_processing: raw.stop_processing,
            conditions,
        }
    }

    /// Ingest the `WEBHOOK_RULES` input: a JSON string, a JSON array, or an
    /// object with a `rules` array. Anything malformed yields an empty rule
    /// list so the router still falls back to the default URL.
    #[must_use]
    pub fn ingest(raw: Option<&serde_json::Value>) -> Vec<Self> {
        let Some(raw) = raw else {
            return vec![];
        };

        let parsed: serde_json::Value = match raw {
            serde_json::Value::String(text) => match serde_json::from_str(text) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(%error, "Malformed webhook rules, using none.");
                    return vec![];
                }
            },
            other => other.clone(),
        };

        let items = match parsed {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut object) => {
                match object.remove("rules") {
                    Some(serde_json::Value::Array(items)) => items,
                    _ => {
                        tracing::warn!("Webhook rules object has no `rules` array, using none.");
                        return vec![];
                    }
                }
            }
            _ => {
                tracing::warn!("Webhook rules are neither an array nor an object, using none.");
                return vec![];
            }
        };

        let mut rules = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match serde_json::from_value::<RawRule>(item) {
                Ok(raw) => Some(Self::compile(index, raw)),
                Err(error) => {
                    tracing::warn!(%error, index, "Skipping malformed webhook rule.");
                    None
                }
            })
            .collect::<Vec<_>>();

        // stable: rules sharing a priority keep their configuration order
        rules.sort_by_key(|rule| rule.priority);
        rules
    }
}
