use anyhow::{Result, anyhow};

/// ASCII (punycode), lower-cased form used for every stored order domain.
/// A leading `*.` wildcard label is preserved.
pub fn normalize_domain_for_storage(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    if let Some(rest) = trimmed.strip_prefix("*.") {
        return Ok(format!("*.{}", to_ascii(rest)?));
    }
    to_ascii(trimmed)
}

/// Picks the first usable domain out of a vendor or legacy field that may
/// hold a comma or whitespace separated list.
pub fn first_storable_domain(raw: &str) -> Option<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| normalize_domain_for_storage(candidate).ok())
}

pub fn normalize_domain_for_display(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('.');
    let (unicode, _) = idna::domain_to_unicode(trimmed);
    unicode.to_lowercase()
}

fn to_ascii(domain: &str) -> Result<String> {
    if domain.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let ascii =
        idna::domain_to_ascii(domain).map_err(|err| anyhow!("invalid domain name: {err}"))?;
    Ok(ascii.to_lowercase())
}
