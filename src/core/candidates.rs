use super::session::SessionState;
use super::urls::{
    DEFAULT_API_URL, is_local_origin, known_api_for, normalize_api_url, normalize_app_url,
    origin_of,
};

fn dedupe(candidates: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for candidate in candidates {
        if !candidate.is_empty() && !seen.contains(&candidate) {
            seen.push(candidate);
        }
    }
    seen
}

/// Whether an explicit API URL is really the front-end origin: a common
/// misconfiguration where the caller pasted the app URL into the API field.
/// Local apps are exempt, since local front-end and API frequently share a
/// host.
fn looks_like_frontend_api(explicit_api: &str, app_origin: Option<&str>, local: bool) -> bool {
    if local {
        return false;
    }
    match (origin_of(explicit_api), app_origin) {
        (Some(explicit_origin), Some(app_origin)) => explicit_origin == app_origin,
        _ => false,
    }
}

/// Ordered, deduplicated API base URLs to try, from explicit input.
///
/// An explicit API URL is authoritative unless it points back at the
/// front-end origin, in which case the known-good mapping (or the global
/// default) is substituted.
pub fn resolve_candidates(explicit_api: Option<&str>, app_url_input: &str) -> Vec<String> {
    let app_url = normalize_app_url(app_url_input);
    let app_origin = origin_of(&app_url);
    let local = app_origin.as_deref().is_some_and(is_local_origin);

    if let Some(explicit) = explicit_api.map(str::trim).filter(|s| !s.is_empty()) {
        let normalized = normalize_api_url(explicit);
        if looks_like_frontend_api(&normalized, app_origin.as_deref(), local) {
            let known = known_api_for(&app_url).unwrap_or(DEFAULT_API_URL);
            return vec![normalize_api_url(known)];
        }
        return vec![normalized];
    }

    let mut candidates = Vec::new();
    if let Some(known) = known_api_for(&app_url) {
        candidates.push(normalize_api_url(known));
    }
    candidates.push(DEFAULT_API_URL.to_string());
    if local {
        candidates.push(normalize_api_url(&app_url));
    }
    dedupe(candidates)
}

/// Candidate order used when resolving from persisted state (the save-job
/// path): the global default leads, then the stored URL unless it looks
/// like the front-end origin, then the known mapping, then the local-dev
/// derivation.
pub fn candidates_from_state(state: &SessionState) -> Vec<String> {
    let app_url = normalize_app_url(&state.app_url);
    let app_origin = origin_of(&app_url);
    let local = app_origin.as_deref().is_some_and(is_local_origin);

    let stored = normalize_api_url(&state.api_url);
    let stored_is_frontend = looks_like_frontend_api(&stored, app_origin.as_deref(), local);

    let mut candidates = vec![DEFAULT_API_URL.to_string()];
    if !stored_is_frontend {
        candidates.push(stored);
    }
    if let Some(known) = known_api_for(&app_url) {
        candidates.push(normalize_api_url(known));
    }
    if local {
        candidates.push(normalize_api_url(&app_url));
    }
    dedupe(candidates)
}

/// Move `preferred` to the front of the candidate list, preserving the
/// relative order of the rest.
pub fn prioritize(candidates: &[String], preferred: &str) -> Vec<String> {
    let mut reordered = vec![preferred.to_string()];
    reordered.extend(candidates.iter().filter(|c| *c != preferred).cloned());
    reordered
}
