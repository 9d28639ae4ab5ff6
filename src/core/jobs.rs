use anyhow::{Result, bail};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::api::ApiClient;
use super::candidates::{candidates_from_state, prioritize};
use super::error::BridgeError;
use super::session::{SessionStore, StatePatch};
use super::tabs::TabHost;
use super::transport::HttpTransport;
use super::urls::{normalize_linkedin_job_url, normalize_url_for_compare};

const JOB_SOURCE: &str = "LinkedIn (Extension)";
const DEFAULT_STATUS: &str = "applied";
const DEFAULT_PRIORITY: &str = "medium";

const MAX_COMPANY_LEN: usize = 200;
const MAX_TITLE_LEN: usize = 300;
const MAX_LOCATION_LEN: usize = 200;

/// Page-side data captured by the content script when the user saves a job.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSeed {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// What the server-side scraper extracted from the job posting. Every field
/// is optional; the seed fills the gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapedJob {
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub job_url: Option<String>,
}

// ── Payload tiers ──
//
// The backend's accepted schema may lag or lead what this client believes
// is current, so creation retries with monotonically smaller payloads:
// Strict ⊆ Minimal ⊆ Full, field-wise.

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullPayload {
    pub company: String,
    pub job_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employment_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub source: String,
    pub status: String,
    pub priority: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimalPayload {
    pub company: String,
    pub job_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub source: String,
    pub status: String,
    pub priority: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrictPayload {
    pub company: String,
    pub job_title: String,
}

impl FullPayload {
    pub fn to_minimal(&self) -> MinimalPayload {
        MinimalPayload {
            company: self.company.clone(),
            job_title: self.job_title.clone(),
            job_url: self.job_url.clone(),
            source_url: self.source_url.clone(),
            source: self.source.clone(),
            status: DEFAULT_STATUS.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
        }
    }

    pub fn to_strict(&self) -> StrictPayload {
        StrictPayload {
            company: self.company.clone(),
            job_title: self.job_title.clone(),
        }
    }
}

fn first_non_empty(values: &[Option<&str>]) -> String {
    values
        .iter()
        .flatten()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .unwrap_or("")
        .to_string()
}

fn truncate_chars(value: String, max: usize) -> String {
    if value.chars().count() <= max {
        value
    } else {
        value.chars().take(max).collect()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Assemble the Full-tier payload from scraped data, falling back field by
/// field to what the content script captured.
pub fn build_create_payload(
    scraped: Option<&ScrapedJob>,
    seed: &JobSeed,
    job_url: &str,
) -> Result<FullPayload, BridgeError> {
    let scraped_company = scraped.and_then(|s| s.company.as_deref());
    let scraped_title = scraped.and_then(|s| s.job_title.as_deref());
    let scraped_location = scraped.and_then(|s| s.location.as_deref());
    let scraped_url = scraped.and_then(|s| s.job_url.as_deref());

    let company = truncate_chars(
        first_non_empty(&[scraped_company, seed.company.as_deref()]),
        MAX_COMPANY_LEN,
    );
    let job_title = truncate_chars(
        first_non_empty(&[scraped_title, seed.job_title.as_deref()]),
        MAX_TITLE_LEN,
    );

    if company.is_empty() || job_title.is_empty() {
        return Err(BridgeError::Validation(
            "Could not detect company/title on this LinkedIn page. Open the job details panel and try again."
                .to_string(),
        ));
    }

    Ok(FullPayload {
        company,
        job_title,
        location: non_empty(truncate_chars(
            first_non_empty(&[scraped_location, seed.location.as_deref()]),
            MAX_LOCATION_LEN,
        )),
        employment_type: scraped
            .and_then(|s| s.employment_type.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        job_url: non_empty(first_non_empty(&[scraped_url, Some(job_url)])),
        source_url: non_empty(first_non_empty(&[Some(job_url), scraped_url])),
        source: JOB_SOURCE.to_string(),
        status: DEFAULT_STATUS.to_string(),
        priority: DEFAULT_PRIORITY.to_string(),
    })
}

/// A previously created record found during duplicate recovery.
#[derive(Debug, Clone)]
pub struct ApplicationRecord {
    pub id: Value,
    pub company: String,
    pub job_title: String,
    pub job_url: String,
    pub source_url: String,
}

impl ApplicationRecord {
    fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id")?.clone();
        if id.is_null() {
            return None;
        }
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        Some(Self {
            id,
            company: text("company"),
            job_title: text("jobTitle"),
            job_url: text("jobUrl"),
            source_url: text("sourceUrl"),
        })
    }
}

/// Search recent applications for a record matching the payload we tried to
/// create: exact URL equality first, then case-insensitive company + title.
async fn find_existing_application<T: HttpTransport, H: TabHost>(
    client: &ApiClient<T, H>,
    candidates: &[String],
    app_url: &str,
    token: &str,
    payload: &FullPayload,
) -> Result<Option<ApplicationRecord>, BridgeError> {
    let search_term = if !payload.job_title.is_empty() {
        payload.job_title.as_str()
    } else {
        payload.company.as_str()
    };
    if search_term.is_empty() {
        return Ok(None);
    }

    let path = format!(
        "/job-tracker/applications?search={}&limit=30&sortBy=createdAt&sortOrder=desc",
        urlencoding::encode(search_term)
    );
    let response = client
        .request_with_fallback(
            candidates,
            Some(app_url),
            Some(token),
            &path,
            Method::GET,
            None,
        )
        .await?;

    let records: Vec<ApplicationRecord> = response
        .payload
        .get("data")
        .and_then(Value::as_array)
        .map(|apps| apps.iter().filter_map(ApplicationRecord::from_value).collect())
        .unwrap_or_default();

    let target_job_url = payload
        .job_url
        .as_deref()
        .map(normalize_url_for_compare)
        .unwrap_or_default();
    let target_source_url = payload
        .source_url
        .as_deref()
        .map(normalize_url_for_compare)
        .unwrap_or_default();

    let exact = records.iter().find(|record| {
        let record_job_url = normalize_url_for_compare(&record.job_url);
        let record_source_url = normalize_url_for_compare(&record.source_url);
        (!target_job_url.is_empty()
            && !record_job_url.is_empty()
            && record_job_url == target_job_url)
            || (!target_source_url.is_empty()
                && !record_source_url.is_empty()
                && record_source_url == target_source_url)
    });
    if let Some(record) = exact {
        return Ok(Some(record.clone()));
    }

    let fold = |s: &str| s.trim().to_lowercase();
    Ok(records
        .iter()
        .find(|record| {
            fold(&record.company) == fold(&payload.company)
                && fold(&record.job_title) == fold(&payload.job_title)
        })
        .cloned())
}

/// Outcome of a save-job run, mirrored verbatim to the popup.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveJobReport {
    pub app_id: Option<Value>,
    pub app_url: String,
    pub company: String,
    pub job_title: String,
    pub used_fallback: bool,
    pub scrape_error: Option<String>,
    pub create_retried: bool,
    pub create_error: Option<String>,
    pub recovered_existing: bool,
}

/// The save-job pipeline: plugin guard, scrape, staged create
/// (Full → Minimal → Strict), then duplicate recovery.
///
/// Creation attempts are strictly sequential; recovery depends on at most
/// one in-flight create per invocation.
pub async fn save_job<T: HttpTransport, H: TabHost>(
    client: &ApiClient<T, H>,
    store: &SessionStore,
    seed: &JobSeed,
) -> Result<SaveJobReport> {
    let state = store.get().await;
    let Some(token) = state.token.clone() else {
        return Err(BridgeError::Auth.into());
    };

    // Validated before any network traffic goes out.
    let Some(raw_url) = seed.url.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(BridgeError::Validation(
            "Could not read the current LinkedIn job URL.".to_string(),
        )
        .into());
    };

    let candidates = candidates_from_state(&state);
    let enabled_api = client
        .ensure_job_tracker_enabled(&candidates, Some(&token), Some(&state.app_url))
        .await?;
    let working = prioritize(&candidates, &enabled_api);

    let job_url = {
        let normalized = normalize_linkedin_job_url(raw_url);
        if normalized.is_empty() {
            raw_url.to_string()
        } else {
            normalized
        }
    };

    let mut scraped: Option<ScrapedJob> = None;
    let mut scrape_error: Option<String> = None;
    match client
        .request_with_fallback(
            &working,
            Some(&state.app_url),
            Some(&token),
            "/job-tracker/scrape",
            Method::POST,
            Some(json!({ "url": job_url })),
        )
        .await
    {
        Ok(response) => {
            scraped = response
                .payload
                .get("data")
                .filter(|v| !v.is_null())
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            // Remember which candidate actually answered.
            if response.api_url != state.api_url {
                store
                    .merge(StatePatch {
                        api_url: Some(response.api_url),
                        ..StatePatch::default()
                    })
                    .await?;
            }
        }
        Err(e) => scrape_error = Some(e.to_string()),
    }

    let payload = build_create_payload(scraped.as_ref(), seed, &job_url)?;

    let bodies = [
        serde_json::to_value(&payload)?,
        serde_json::to_value(payload.to_minimal())?,
        serde_json::to_value(payload.to_strict())?,
    ];

    let mut created: Option<Value> = None;
    let mut create_error: Option<String> = None;
    for body in bodies {
        match client
            .request_with_fallback(
                &working,
                Some(&state.app_url),
                Some(&token),
                "/job-tracker/applications",
                Method::POST,
                Some(body),
            )
            .await
        {
            Ok(response) => {
                created = Some(response.payload);
                break;
            }
            Err(e) => {
                create_error = Some(match create_error {
                    Some(trail) => format!("{}; {}", trail, e),
                    None => e.to_string(),
                });
            }
        }
    }

    let mut recovered: Option<ApplicationRecord> = None;
    if created.is_none() {
        // The create may have landed server-side before a secondary failure
        // (audit log, response serialization) corrupted the reply.
        recovered = match find_existing_application(
            client,
            &working,
            &state.app_url,
            &token,
            &payload,
        )
        .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "duplicate-recovery search failed");
                None
            }
        };
        if recovered.is_none() {
            bail!(create_error.unwrap_or_else(|| "Create failed".to_string()));
        }
        info!(company = %payload.company, "recovered an existing application after failed create");
    }

    let app_id = created
        .as_ref()
        .and_then(|payload| payload.pointer("/data/id"))
        .filter(|id| !id.is_null())
        .cloned()
        .or_else(|| recovered.as_ref().map(|record| record.id.clone()));

    Ok(SaveJobReport {
        app_id,
        app_url: state.app_url.clone(),
        company: payload.company.clone(),
        job_title: payload.job_title.clone(),
        used_fallback: scraped.is_none(),
        scrape_error,
        create_retried: create_error.is_some(),
        create_error,
        recovered_existing: recovered.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{FakeTabHost, FakeTransport};
    use crate::core::transport::TransportResult;
    use crate::core::urls::DEFAULT_API_URL;

    const JOB_URL: &str = "https://www.linkedin.com/jobs/view/123/";

    fn seed() -> JobSeed {
        JobSeed {
            url: Some("https://www.linkedin.com/jobs/view/123?refId=abc".to_string()),
            company: Some("Acme".to_string()),
            job_title: Some("Engineer".to_string()),
            location: None,
        }
    }

    async fn logged_in_store(dir: &tempfile::TempDir) -> SessionStore {
        let store = SessionStore::new(dir.path().join("state.json"));
        store
            .merge(StatePatch {
                api_url: Some("https://api.test".to_string()),
                app_url: Some("https://app.test".to_string()),
                token: Some(Some("tok".to_string())),
                ..StatePatch::default()
            })
            .await
            .unwrap();
        store
    }

    fn transport_with_guard() -> FakeTransport {
        let transport = FakeTransport::new();
        transport.stub_method(
            "/plugins/job-tracker/status",
            Method::GET,
            vec![TransportResult::Success(json!({"data": {"enabled": true}}))],
        );
        transport
    }

    fn client(transport: FakeTransport) -> ApiClient<FakeTransport, FakeTabHost> {
        ApiClient::new(transport, FakeTabHost::unavailable())
    }

    #[test]
    fn payload_tiers_are_strict_subsets() {
        let full = FullPayload {
            company: "Acme".to_string(),
            job_title: "Engineer".to_string(),
            location: Some("Berlin".to_string()),
            employment_type: Some("Full-time".to_string()),
            job_url: Some(JOB_URL.to_string()),
            source_url: Some(JOB_URL.to_string()),
            source: JOB_SOURCE.to_string(),
            status: DEFAULT_STATUS.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
        };

        let keys = |v: Value| -> Vec<String> {
            v.as_object().unwrap().keys().cloned().collect()
        };
        let full_keys = keys(serde_json::to_value(&full).unwrap());
        let minimal_keys = keys(serde_json::to_value(full.to_minimal()).unwrap());
        let strict_keys = keys(serde_json::to_value(full.to_strict()).unwrap());

        assert!(strict_keys.iter().all(|k| minimal_keys.contains(k)));
        assert!(minimal_keys.iter().all(|k| full_keys.contains(k)));
        assert_eq!(strict_keys, vec!["company", "jobTitle"]);
    }

    #[test]
    fn build_payload_prefers_scraped_fields_and_caps_lengths() {
        let scraped = ScrapedJob {
            company: Some("  Scraped Co  ".to_string()),
            job_title: Some("x".repeat(400)),
            ..ScrapedJob::default()
        };
        let payload = build_create_payload(Some(&scraped), &seed(), JOB_URL).unwrap();
        assert_eq!(payload.company, "Scraped Co");
        assert_eq!(payload.job_title.chars().count(), 300);
        assert_eq!(payload.job_url.as_deref(), Some(JOB_URL));
        assert_eq!(payload.source_url.as_deref(), Some(JOB_URL));
        assert_eq!(payload.status, "applied");
        assert_eq!(payload.priority, "medium");
    }

    #[test]
    fn build_payload_requires_company_and_title() {
        let empty = JobSeed {
            url: Some(JOB_URL.to_string()),
            ..JobSeed::default()
        };
        let error = build_create_payload(None, &empty, JOB_URL).unwrap_err();
        assert!(error.to_string().contains("Could not detect company/title"));
    }

    #[tokio::test]
    async fn full_payload_success_reports_no_retry() {
        let transport = transport_with_guard();
        transport.stub_method(
            "/job-tracker/scrape",
            Method::POST,
            vec![TransportResult::Success(
                json!({"data": {"company": "Scraped Co", "jobTitle": "Staff Engineer"}}),
            )],
        );
        transport.stub_method(
            "/job-tracker/applications",
            Method::POST,
            vec![TransportResult::Success(json!({"data": {"id": "a1"}}))],
        );

        let dir = tempfile::tempdir().unwrap();
        let store = logged_in_store(&dir).await;
        let client = client(transport);

        let report = save_job(&client, &store, &seed()).await.unwrap();
        assert_eq!(report.app_id, Some(json!("a1")));
        assert_eq!(report.company, "Scraped Co");
        assert_eq!(report.job_title, "Staff Engineer");
        assert!(!report.used_fallback);
        assert!(!report.create_retried);
        assert!(!report.recovered_existing);
        assert!(report.create_error.is_none());

        // The candidate that answered the scrape became the stored API URL.
        assert_eq!(store.get().await.api_url, DEFAULT_API_URL);
    }

    #[tokio::test]
    async fn strict_success_keeps_the_error_trail() {
        let transport = transport_with_guard();
        transport.stub_method(
            "/job-tracker/scrape",
            Method::POST,
            vec![TransportResult::Success(json!({"data": null}))],
        );
        transport.stub_method(
            "/job-tracker/applications",
            Method::POST,
            vec![
                TransportResult::HttpFailure {
                    status: 400,
                    message: "full rejected".to_string(),
                },
                TransportResult::HttpFailure {
                    status: 400,
                    message: "minimal rejected".to_string(),
                },
                TransportResult::Success(json!({"data": {"id": "s1"}})),
            ],
        );

        let dir = tempfile::tempdir().unwrap();
        let store = logged_in_store(&dir).await;
        let client = client(transport);

        let report = save_job(&client, &store, &seed()).await.unwrap();
        assert_eq!(report.app_id, Some(json!("s1")));
        assert!(report.used_fallback);
        assert!(report.create_retried);
        assert!(!report.recovered_existing);
        assert_eq!(
            report.create_error.as_deref(),
            Some("full rejected; minimal rejected")
        );
    }

    #[tokio::test]
    async fn recovery_matches_existing_record_by_url() {
        let transport = transport_with_guard();
        transport.stub_method(
            "/job-tracker/scrape",
            Method::POST,
            vec![TransportResult::Success(json!({"data": null}))],
        );
        transport.stub_method(
            "/job-tracker/applications",
            Method::POST,
            vec![TransportResult::HttpFailure {
                status: 500,
                message: "create broke".to_string(),
            }],
        );
        transport.stub_method(
            "/job-tracker/applications?search=",
            Method::GET,
            vec![TransportResult::Success(json!({"data": [
                {
                    "id": "e9",
                    "company": "Other",
                    "jobTitle": "Other title",
                    "jobUrl": "https://www.linkedin.com/jobs/view/123?utm=x",
                    "sourceUrl": "",
                },
            ]}))],
        );

        let dir = tempfile::tempdir().unwrap();
        let store = logged_in_store(&dir).await;
        let client = client(transport);

        let report = save_job(&client, &store, &seed()).await.unwrap();
        assert!(report.recovered_existing);
        assert_eq!(report.app_id, Some(json!("e9")));
        assert!(report.create_retried);
        let trail = report.create_error.unwrap();
        assert_eq!(trail.matches("create broke").count(), 3);
    }

    #[tokio::test]
    async fn recovery_falls_back_to_company_and_title_match() {
        let transport = transport_with_guard();
        transport.stub_method(
            "/job-tracker/scrape",
            Method::POST,
            vec![TransportResult::Success(json!({"data": null}))],
        );
        transport.stub_method(
            "/job-tracker/applications",
            Method::POST,
            vec![TransportResult::HttpFailure {
                status: 500,
                message: "create broke".to_string(),
            }],
        );
        transport.stub_method(
            "/job-tracker/applications?search=",
            Method::GET,
            vec![TransportResult::Success(json!({"data": [
                {
                    "id": 42,
                    "company": "  ACME ",
                    "jobTitle": "engineer",
                    "jobUrl": "https://elsewhere.test/post/9",
                    "sourceUrl": "https://elsewhere.test/post/9",
                },
            ]}))],
        );

        let dir = tempfile::tempdir().unwrap();
        let store = logged_in_store(&dir).await;
        let client = client(transport);

        let report = save_job(&client, &store, &seed()).await.unwrap();
        assert!(report.recovered_existing);
        assert_eq!(report.app_id, Some(json!(42)));
    }

    #[tokio::test]
    async fn all_stages_failing_without_a_match_raises_the_full_trail() {
        let transport = transport_with_guard();
        transport.stub_method(
            "/job-tracker/scrape",
            Method::POST,
            vec![TransportResult::Success(json!({"data": null}))],
        );
        transport.stub_method(
            "/job-tracker/applications",
            Method::POST,
            vec![
                TransportResult::HttpFailure {
                    status: 400,
                    message: "stage one".to_string(),
                },
                TransportResult::HttpFailure {
                    status: 400,
                    message: "stage two".to_string(),
                },
                TransportResult::HttpFailure {
                    status: 400,
                    message: "stage three".to_string(),
                },
            ],
        );
        transport.stub_method(
            "/job-tracker/applications?search=",
            Method::GET,
            vec![TransportResult::Success(json!({"data": []}))],
        );

        let dir = tempfile::tempdir().unwrap();
        let store = logged_in_store(&dir).await;
        let client = client(transport);

        let error = save_job(&client, &store, &seed()).await.unwrap_err();
        assert_eq!(error.to_string(), "stage one; stage two; stage three");
    }

    #[tokio::test]
    async fn scrape_failure_is_tolerated_and_recorded() {
        let transport = transport_with_guard();
        transport.stub_method(
            "/job-tracker/scrape",
            Method::POST,
            vec![TransportResult::HttpFailure {
                status: 502,
                message: "scraper down".to_string(),
            }],
        );
        transport.stub_method(
            "/job-tracker/applications",
            Method::POST,
            vec![TransportResult::Success(json!({"data": {"id": "a2"}}))],
        );

        let dir = tempfile::tempdir().unwrap();
        let store = logged_in_store(&dir).await;
        let client = client(transport);

        let report = save_job(&client, &store, &seed()).await.unwrap();
        assert_eq!(report.scrape_error.as_deref(), Some("scraper down"));
        assert!(report.used_fallback);
        assert_eq!(report.company, "Acme");
        assert!(!report.create_retried);
    }

    #[tokio::test]
    async fn missing_url_fails_before_any_network_call() {
        let transport = transport_with_guard();
        let dir = tempfile::tempdir().unwrap();
        let store = logged_in_store(&dir).await;
        let client = client(transport);

        let error = save_job(&client, &store, &JobSeed::default())
            .await
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Could not read the current LinkedIn job URL."
        );
        assert_eq!(client.transport().call_count(), 0);
    }

    #[tokio::test]
    async fn missing_token_is_an_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("state.json"));
        let client = client(FakeTransport::new());

        let error = save_job(&client, &store, &seed()).await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "Please log in from the extension popup first."
        );
    }
}
