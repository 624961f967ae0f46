//! Proxy injection for the builder Dockerfiles.

use crate::config::ProxyConfig;

/// Lines to add to a Dockerfile for `proxy`, in file order.
pub fn proxy_lines(proxy: &ProxyConfig) -> Vec<String> {
    let mut lines = Vec::new();
    for (var, value) in [
        ("http_proxy", &proxy.http),
        ("https_proxy", &proxy.https),
        ("ftp_proxy", &proxy.ftp),
        ("no_proxy", &proxy.no_proxy),
    ] {
        if let Some(value) = value {
            lines.push(format!("ENV {} \"{}\"", var, value));
        }
    }
    if let Some(yum) = &proxy.yum {
        lines.push(format!("RUN echo \"proxy={}\" >> /etc/yum.conf", yum));
    }
    lines
}

/// Insert proxy settings right after the first `FROM` instruction.
///
/// Returns `None` when there is nothing to change: no `FROM`, no proxy
/// values, or the lines are already present.
pub fn with_proxies(dockerfile: &str, proxy: &ProxyConfig) -> Option<String> {
    let lines = proxy_lines(proxy);
    let first = lines.first()?;
    if dockerfile.lines().any(|line| line.trim() == first.as_str()) {
        return None;
    }

    let mut out: Vec<&str> = dockerfile.lines().collect();
    let from = out
        .iter()
        .position(|line| line.split_whitespace().any(|word| word == "FROM"))?;
    for (offset, line) in lines.iter().enumerate() {
        out.insert(from + 1 + offset, line.as_str());
    }

    let mut rendered = out.join("\n");
    if dockerfile.ends_with('\n') {
        rendered.push('\n');
    }
    Some(rendered)
}
