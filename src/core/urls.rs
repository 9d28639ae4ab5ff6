use url::Url;

pub const DEFAULT_APP_URL: &str = "https://taas-ten.vercel.app";
pub const DEFAULT_API_URL: &str = "https://taas-col4.onrender.com/api";

const API_SUFFIX: &str = "/api";

/// Static table correcting app URLs that are known to be served separately
/// from their API.
const KNOWN_API_BY_APP: &[(&str, &str)] = &[(DEFAULT_APP_URL, DEFAULT_API_URL)];

pub fn known_api_for(app_url: &str) -> Option<&'static str> {
    KNOWN_API_BY_APP
        .iter()
        .find(|(app, _)| *app == app_url)
        .map(|(_, api)| *api)
}

fn trim_slash(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

/// Canonical app URL: trimmed, no trailing slash, empty input maps to the
/// hosted default.
pub fn normalize_app_url(value: &str) -> String {
    let normalized = trim_slash(value);
    if normalized.is_empty() {
        return DEFAULT_APP_URL.to_string();
    }
    normalized
}

/// Canonical API base URL. Appends the `/api` suffix exactly once, so the
/// function is idempotent.
pub fn normalize_api_url(value: &str) -> String {
    let normalized = trim_slash(value);
    if normalized.is_empty() {
        return DEFAULT_API_URL.to_string();
    }
    if normalized.ends_with(API_SUFFIX) {
        normalized
    } else {
        format!("{}{}", normalized, API_SUFFIX)
    }
}

/// Origin (`scheme://host[:port]`) of a URL, or `None` when it does not parse.
pub fn origin_of(value: &str) -> Option<String> {
    let parsed = Url::parse(value.trim()).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// Whether an origin points at a local dev server.
pub fn is_local_origin(origin: &str) -> bool {
    let Some((_, host_port)) = origin.split_once("://") else {
        return false;
    };
    let host = host_port.split(':').next().unwrap_or("");
    host == "localhost" || host == "127.0.0.1"
}

/// Reduce a URL to `origin + path` with trailing slashes stripped, for
/// equality checks only. Query strings and fragments are irrelevant to
/// whether two records point at the same job posting.
pub fn normalize_url_for_compare(value: &str) -> String {
    match Url::parse(value.trim()) {
        Ok(parsed) if parsed.origin().is_tuple() => {
            let combined = format!("{}{}", parsed.origin().ascii_serialization(), parsed.path());
            combined.trim_end_matches('/').to_string()
        }
        _ => value.trim().trim_end_matches('/').to_string(),
    }
}

/// Numeric LinkedIn job id, from `/jobs/view/<id>` in the path or from the
/// `currentJobId`/`jobId` query parameters.
pub fn extract_linkedin_job_id(raw_url: &str) -> Option<String> {
    fn id_from_path(path: &str) -> Option<String> {
        let rest = path.split("/jobs/view/").nth(1)?;
        let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if id.is_empty() { None } else { Some(id) }
    }

    if let Ok(parsed) = Url::parse(raw_url) {
        if let Some(id) = id_from_path(parsed.path()) {
            return Some(id);
        }
        for (key, value) in parsed.query_pairs() {
            if (key == "currentJobId" || key == "jobId")
                && !value.is_empty()
                && value.chars().all(|c| c.is_ascii_digit())
            {
                return Some(value.into_owned());
            }
        }
        return None;
    }

    id_from_path(raw_url)
}

/// Canonical form of a LinkedIn job URL: `https://www.linkedin.com/jobs/view/<id>/`
/// when an id can be extracted, otherwise origin + path. Non-LinkedIn URLs
/// pass through untouched.
pub fn normalize_linkedin_job_url(raw_url: &str) -> String {
    if raw_url.is_empty() {
        return String::new();
    }

    let Ok(parsed) = Url::parse(raw_url) else {
        return raw_url.to_string();
    };

    let host = parsed.host_str().unwrap_or("");
    if !host.contains("linkedin.com") {
        return raw_url.to_string();
    }

    if let Some(id) = extract_linkedin_job_id(raw_url) {
        return format!("https://www.linkedin.com/jobs/view/{}/", id);
    }

    if parsed.origin().is_tuple() {
        format!("{}{}", parsed.origin().ascii_serialization(), parsed.path())
    } else {
        raw_url.to_string()
    }
}
