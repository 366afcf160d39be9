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

/// A condition value, precompiled at rule ingestion.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Case-insensitive string equality.
    Exact(String),
    /// A `*` glob, compiled to an anchored case-insensitive regex.
    Wildcard(regex::Regex),
    /// A `/pattern/flags` literal.
    Regex(regex::Regex),
    /// A regex literal that failed to compile: the condition is false, the
    /// rest of the rule evaluation is unaffected.
    Invalid,
}

impl Matcher {
    /// Compile a raw condition value.
    ///
    /// `/pattern/flags` is a regex literal (a single `/` is not a wrapper
    /// and falls through to an exact match), a value containing `*` is a
    /// glob, anything else compares for equality ignoring case.
    #[must_use]
    pub fn compile(raw: &str) -> Self {
        if let Some(stripped) = raw.strip_prefix('/') {
            if let Some(slash) = stripped.rfind('/') {
                let (pattern, flags) = stripped.split_at(slash);
                return Self::compile_regex(pattern, &flags[1..]);
            }
        }

        if raw.contains('*') {
            let anchored = format!("^{}$", regex::escape(raw).replace(r"\*", ".*"));
            return regex::RegexBuilder::new(&anchored)
                .case_insensitive(true)
                .build()
                .map_or(Self::Invalid, Self::Wildcard);
        }

        Self::Exact(raw.to_string())
    }

    fn compile_regex(pattern: &str, flags: &str) -> Self {
        let mut builder = regex::RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                // javascript-style flags with no equivalent here (g, u, y)
                // only affect iteration, not the match itself
                _ => &mut builder,
            };
        }

        match builder.build() {
            Ok(regex) => Self::Regex(regex),
            Err(error) => {
                tracing::warn!(%error, pattern, "Invalid regex in rule condition.");
                Self::Invalid
            }
        }
    }

    /// Does `value` satisfy the matcher ?
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(expected) => expected.eq_ignore_ascii_case(value),
            Self::Wildcard(regex) | Self::Regex(regex) => regex.is_match(value),
            Self::Invalid => false,
        }
    }
}
