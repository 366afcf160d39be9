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

/// Canonical form of a client address: IPv4-mapped IPv6 collapses to the
/// IPv4 form, everything rendered lowercase, so it compares with the
/// configured allow-lists textually.
#[must_use]
pub fn normalize_ip(addr: std::net::IpAddr) -> String {
    match addr {
        std::net::IpAddr::V4(v4) => v4.to_string(),
        std::net::IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or_else(|| v6.to_string().to_lowercase(), |v4| v4.to_string()),
    }
}

/// Does the address' domain appear in the allow-list ?
///
/// An empty list allows everything; an address without a domain cannot be
/// verified and is refused once a list is configured.
#[must_use]
pub fn domain_allowed(address: Option<&str>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }

    let Some(domain) = address.and_then(|addr| addr.rsplit_once('@')).map(|(_, d)| d) else {
        return false;
    };

    allowed
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(domain))
}

/// Sliding-window connection limiter keyed by the remote IP.
///
/// Exactly `max_hits` connections inside a window are admitted, the next
/// one is rejected until the oldest hit slides out.
pub struct RateLimiter {
    window: std::time::Duration,
    max_hits: usize,
    hits: std::sync::Mutex<
        std::collections::HashMap<String, std::collections::VecDeque<std::time::Instant>>,
    >,
}

impl RateLimiter {
    ///
    #[must_use]
    pub fn new(window: std::time::Duration, max_hits: usize) -> Self {
        Self {
            window,
            max_hits,
            hits: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Record a hit for `key` and tell whether it is admitted.
    pub fn check(&self, key: &str) -> bool {
        let now = std::time::Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter poisoned");

        let entry = hits.entry(key.to_string()).or_default();
        while entry
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            entry.pop_front();
        }

        if entry.len() >= self.max_hits {
            return false;
        }

        entry.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("192.0.2.7", "192.0.2.7")]
    #[case("::ffff:192.0.2.7", "192.0.2.7")]
    #[case("2001:DB8::1", "2001:db8::1")]
    fn normalization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(
            normalize_ip(input.parse().unwrap()),
            expected
        );
    }

    #[test]
    fn empty_allow_list_admits_everything() {
        assert!(domain_allowed(Some("a@anything.example"), &[]));
        assert!(domain_allowed(None, &[]));
    }

    #[test]
    fn domain_check_is_case_insensitive() {
        let allowed = vec!["Example.COM".to_string()];
        assert!(domain_allowed(Some("a@example.com"), &allowed));
        assert!(domain_allowed(Some("a@EXAMPLE.com"), &allowed));
        assert!(!domain_allowed(Some("a@example.org"), &allowed));
    }

    #[test]
    fn missing_domain_is_refused_when_a_list_exists() {
        let allowed = vec!["example.com".to_string()];
        assert!(!domain_allowed(None, &allowed));
        assert!(!domain_allowed(Some("not-an-address"), &allowed));
    }

    #[test]
    fn admits_exactly_the_cap_then_rejects() {
        let limiter = RateLimiter::new(std::time::Duration::from_secs(60), 3);

        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));

        // another client is unaffected
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(std::time::Duration::from_millis(40), 2);

        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(limiter.check("10.0.0.1"));
    }
}
