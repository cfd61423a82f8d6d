use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use nanoclaw_types::{Action, Plan, WebFetchMode};

/// Hosts whose content is useless without script execution; links to them
/// are fetched in browser mode.
const DYNAMIC_PAGE_DOMAINS: &[&str] = &[
    "x.com",
    "twitter.com",
    "reddit.com",
    "instagram.com",
    "facebook.com",
    "youtube.com",
    "tiktok.com",
    "linkedin.com",
];

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bhttps?://[^\s<>()\[\]]+").expect("url pattern"));

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9][a-z0-9-]*\.)+[a-z]{2,}(?:/[^\s<>()\[\]]*)?").expect("domain pattern")
});

/// Append a synthesized `web_fetch` when the user message carries a bare URL
/// or domain and the plan does not already fetch anything. Runs only after a
/// successful parse, before the proposal is enqueued. Returns whether an
/// action was added.
pub fn inject_fallback_fetch(plan: &mut Plan, user_text: &str) -> bool {
    let already_fetches = plan
        .actions
        .iter()
        .any(|a| matches!(a, Action::WebFetch { .. }));
    if already_fetches {
        return false;
    }

    let Some(url) = find_link(user_text) else {
        return false;
    };

    let mode = if is_dynamic_page(&url) {
        WebFetchMode::Browser
    } else {
        WebFetchMode::Http
    };
    debug!(url = %url, ?mode, "injecting fallback web_fetch");

    plan.actions.push(Action::WebFetch {
        url,
        reason: "Fetch the link referenced in the message".to_string(),
        mode,
        extract: None,
        requires_approval: true,
        execution_mode: None,
        parallel_group: None,
    });
    true
}

fn find_link(text: &str) -> Option<String> {
    if let Some(m) = URL_RE.find(text) {
        return Some(trim_trailing_punctuation(m.as_str()).to_string());
    }
    DOMAIN_RE
        .find(text)
        .map(|m| format!("https://{}", trim_trailing_punctuation(m.as_str())))
}

fn trim_trailing_punctuation(link: &str) -> &str {
    link.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"'])
}

fn is_dynamic_page(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    DYNAMIC_PAGE_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}
