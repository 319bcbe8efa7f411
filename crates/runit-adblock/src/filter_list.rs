//! Filter List Parser
//!
//! Reduces filter lists to two things: blocked domains and short path
//! fragments. Understands:
//! - Block-filter domains: ||example.com^
//! - Hosts files: 0.0.0.0 example.com / 127.0.0.1 example.com
//! - Bare domain lists: example.com
//! - Path hints: /ads/banner
//! - Comments: ! # [Adblock Plus...]
//!
//! Everything else (cosmetic rules, exceptions, regex rules) is dropped.

use std::collections::BTreeSet;

/// Length bounds for a kept path fragment
const MIN_PATH_HINT: usize = 3;
const MAX_PATH_HINT: usize = 64;

/// Hosts-file placeholder names that must never be blocked
const HOSTS_PLACEHOLDERS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "0.0.0.0",
];

/// One useful line of a filter list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Block this domain and all of its subdomains
    Domain(String),
    /// Block any request whose path contains this fragment
    PathHint(String),
}

/// Domains and path fragments pulled from one list
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractedRules {
    pub domains: BTreeSet<String>,
    pub path_hints: BTreeSet<String>,
}

/// Normalize a domain: lowercase, no surrounding dots, no `www.` label.
pub fn normalize_domain(domain: &str) -> String {
    let lowered = domain.to_lowercase();
    let mut d = lowered.as_str();
    // Repeat until nothing changes so normalizing twice is a no-op
    loop {
        let trimmed = d.trim().trim_matches('.');
        let stripped = trimmed.strip_prefix("www.").unwrap_or(trimmed);
        if stripped.len() == d.len() {
            break;
        }
        d = stripped;
    }
    d.to_string()
}

/// Parse a single list line
pub fn parse_line(raw: &str) -> Option<Rule> {
    let line = raw.trim();
    if line.is_empty()
        || line.starts_with('!')
        || line.starts_with("[Adblock")
        || line.starts_with('#')
    {
        return None;
    }

    if let Some(domain) = block_filter_domain(line).or_else(|| hosts_domain(line)) {
        return Some(Rule::Domain(domain));
    }

    path_hint(line).map(Rule::PathHint)
}

/// Parse a whole list
pub fn extract(text: &str) -> ExtractedRules {
    let mut rules = ExtractedRules::default();
    for line in text.lines() {
        match parse_line(line) {
            Some(Rule::Domain(d)) => {
                rules.domains.insert(d);
            }
            Some(Rule::PathHint(p)) => {
                rules.path_hints.insert(p);
            }
            None => {}
        }
    }
    rules
}

/// `||domain^...` → domain
fn block_filter_domain(line: &str) -> Option<String> {
    let rest = line.strip_prefix("||")?;
    let end = rest.find(['^', '/'])?;
    if rest.as_bytes()[end] != b'^' || end == 0 {
        return None;
    }
    valid_domain(normalize_domain(&rest[..end]))
}

/// `0.0.0.0 domain`, `127.0.0.1 domain` or a bare `domain.tld` line
fn hosts_domain(line: &str) -> Option<String> {
    for prefix in ["0.0.0.0", "127.0.0.1"] {
        let Some(rest) = line.strip_prefix(prefix) else {
            continue;
        };
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let token = rest
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '#')
            .next()
            .unwrap_or("");
        if token.is_empty() {
            return None;
        }
        let domain = normalize_domain(token);
        if is_placeholder(&domain) {
            return None;
        }
        return valid_domain(domain);
    }

    let lowered = line.to_ascii_lowercase();
    if is_bare_hostname(&lowered) {
        let domain = normalize_domain(&lowered);
        if !is_placeholder(&domain) {
            return valid_domain(domain);
        }
    }
    None
}

/// Short path fragment from a URL-ish rule
fn path_hint(line: &str) -> Option<String> {
    if !line.contains('/')
        || line.starts_with("@@")
        || line.starts_with("##")
        || line.starts_with("#@")
    {
        return None;
    }
    if is_cosmetic(line) {
        return None;
    }

    let cleaned = line.replace('*', "").to_lowercase();
    let fragment = cleaned.split('$').next().unwrap_or("");
    let len = fragment.chars().count();
    if (MIN_PATH_HINT..=MAX_PATH_HINT).contains(&len) && fragment.contains('/') {
        Some(fragment.to_string())
    } else {
        None
    }
}

/// Element-hiding rules with a domain prefix, e.g. `example.com##.ad`
fn is_cosmetic(line: &str) -> bool {
    ["##", "#@#", "#?#", "#$#"].iter().any(|sep| line.contains(sep))
}

fn is_placeholder(domain: &str) -> bool {
    HOSTS_PLACEHOLDERS.contains(&domain) || domain.starts_with("ip6-")
}

/// Dotted labels of `[a-z0-9.-]`, ending in an alphabetic TLD of 2+ letters
fn is_bare_hostname(line: &str) -> bool {
    if !line
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return false;
    }
    match line.rsplit_once('.') {
        Some((head, tld)) => {
            !head.is_empty() && tld.len() >= 2 && tld.bytes().all(|b| b.is_ascii_lowercase())
        }
        None => false,
    }
}

fn valid_domain(domain: String) -> Option<String> {
    let ok = !domain.is_empty()
        && domain
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
    ok.then_some(domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_filter_domain() {
        assert_eq!(
            parse_line("||doubleclick.net^$third-party"),
            Some(Rule::Domain("doubleclick.net".to_string()))
        );
        assert_eq!(
            parse_line("||WWW.Ads.Example.com^"),
            Some(Rule::Domain("ads.example.com".to_string()))
        );
    }

    #[test]
    fn test_block_filter_with_path_is_not_a_domain() {
        // `/` before `^` means a URL rule, not a whole-domain rule
        assert_ne!(
            parse_line("||example.com/ads^"),
            Some(Rule::Domain("example.com".to_string()))
        );
        assert_eq!(parse_line("||*.example.com^"), None);
    }

    #[test]
    fn test_parse_hosts_lines() {
        assert_eq!(
            parse_line("0.0.0.0 tracker.example.org"),
            Some(Rule::Domain("tracker.example.org".to_string()))
        );
        assert_eq!(
            parse_line("127.0.0.1\tads.example.net # inline comment"),
            Some(Rule::Domain("ads.example.net".to_string()))
        );
        assert_eq!(
            parse_line("0.0.0.0 www.metrics.example#x"),
            Some(Rule::Domain("metrics.example".to_string()))
        );
        assert_eq!(
            parse_line("Ad.Example.COM"),
            Some(Rule::Domain("ad.example.com".to_string()))
        );
    }

    #[test]
    fn test_hosts_placeholders_skipped() {
        assert_eq!(parse_line("127.0.0.1 localhost"), None);
        assert_eq!(parse_line("127.0.0.1 localhost.localdomain"), None);
        assert_eq!(parse_line("0.0.0.0 0.0.0.0"), None);
        assert_eq!(parse_line("255.255.255.255 broadcasthost"), None);
        assert_eq!(parse_line("0.0.0.0 ip6-localhost"), None);
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(parse_line("!comment"), None);
        assert_eq!(parse_line("[Adblock Plus 2.0]"), None);
        assert_eq!(parse_line("# hosts comment with a /path"), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn test_path_hints() {
        assert_eq!(
            parse_line("/ads/banner123"),
            Some(Rule::PathHint("/ads/banner123".to_string()))
        );
        assert_eq!(
            parse_line("/Banner/*/Track$image"),
            Some(Rule::PathHint("/banner//track".to_string()))
        );
        // Too short after `$` truncation
        assert_eq!(parse_line("/a$script"), None);
        // Over 64 characters
        assert_eq!(parse_line(&format!("/{}", "x".repeat(70))), None);
        // No `/` at all: neither a domain nor a path
        assert_eq!(parse_line("adsbygoogle"), None);
    }

    #[test]
    fn test_exceptions_and_cosmetics_dropped() {
        assert_eq!(parse_line("@@||cdn.example.com/ads/^"), None);
        assert_eq!(parse_line("##.ad-banner"), None);
        assert_eq!(parse_line("#@#.sponsored"), None);
        assert_eq!(parse_line("example.com##div[src*=\"/ads/\"]"), None);
        assert_eq!(parse_line("example.com#?#.ad:has(a[href*=\"/promo/\"])"), None);
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(".Example.COM"), "example.com");
        assert_eq!(normalize_domain("www.example.com"), "example.com");
        assert_eq!(normalize_domain("  www.www.example.com "), "example.com");
        assert_eq!(normalize_domain("wwwexample.com"), "wwwexample.com");
        assert_eq!(normalize_domain("example.com."), "example.com");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "Example.com",
            ".www.example.com",
            "www..www.example.com",
            "WWW.WWW.",
            "www.",
            "..",
            "",
            " a.b.c ",
            "www.x.www.y",
            ". www.example.com.",
        ];
        for input in inputs {
            let once = normalize_domain(input);
            assert_eq!(normalize_domain(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn test_extract_list() {
        let content = "\
! Title: test
[Adblock Plus 2.0]
||tracker.com^
||tracker.com^$third-party
0.0.0.0 ads.example.org\r
@@||allowed.example.com^
example.com##.ad
/advertisements/
";
        let rules = extract(content);
        assert_eq!(
            rules.domains.into_iter().collect::<Vec<_>>(),
            vec!["ads.example.org".to_string(), "tracker.com".to_string()]
        );
        assert_eq!(
            rules.path_hints.into_iter().collect::<Vec<_>>(),
            vec!["/advertisements/".to_string()]
        );
    }
}
