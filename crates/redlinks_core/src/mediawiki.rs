use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::category::{CategoryClient, CategoryMembers, MemberPage};
use crate::config::RedlinksConfig;
use crate::title::{NS_CATEGORY, NS_MAIN, category_title};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RATE_LIMIT_MS: u64 = 300;
const DEFAULT_MAX_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &RedlinksConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: config.wiki.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            rate_limit_ms: config.wiki.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS),
            max_retries: config.wiki.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    pub fn with_api_url(mut self, api_url: Option<String>) -> Self {
        if let Some(api_url) = api_url {
            self.api_url = api_url;
        }
        self
    }
}

/// Read-only Action API client used to walk category membership.
pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", self.config.api_url))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            warn!(%status, attempt, "retrying MediaWiki API request");
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    check_api_error(&payload)?;
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        warn!(%error, attempt, "retrying MediaWiki API request");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl CategoryClient for MediaWikiClient {
    fn members(&mut self, category: &str) -> Result<CategoryMembers> {
        let cmtitle = category_title(category);
        collect_category_members(|continue_token| {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", cmtitle.clone()),
                ("cmtype", "page|subcat".to_string()),
                ("cmprop", "ids|title|type".to_string()),
                ("cmnamespace", format!("{NS_MAIN}|{NS_CATEGORY}")),
                ("cmlimit", "500".to_string()),
            ];
            if let Some(token) = continue_token {
                params.push(("cmcontinue", token.to_string()));
            }
            self.request_json_get(&params)
        })
    }
}

/// Follows `cmcontinue` until the listing is exhausted.
fn collect_category_members(
    mut fetch: impl FnMut(Option<&str>) -> Result<Value>,
) -> Result<CategoryMembers> {
    let mut members = CategoryMembers::default();
    let mut continue_token: Option<String> = None;

    loop {
        let response = fetch(continue_token.as_deref())?;
        let parsed: CategoryMembersResponse = serde_json::from_value(response)
            .context("failed to decode categorymembers API response")?;

        for item in parsed.query.categorymembers {
            match (item.member_type.as_deref(), item.ns) {
                (Some("subcat"), _) | (None, NS_CATEGORY) => members.subcategories.push(item.title),
                (Some("page"), NS_MAIN) | (None, NS_MAIN) => {
                    members.pages.push(MemberPage::new(item.pageid, item.title));
                }
                _ => debug!(title = %item.title, ns = item.ns, "ignoring category member"),
            }
        }

        continue_token = parsed.continuation.and_then(|cont| cont.cmcontinue);
        if continue_token.is_none() {
            break;
        }
    }

    Ok(members)
}

fn check_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct CategoryMembersResponse {
    #[serde(default)]
    query: CategoryMembersQuery,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct CategoryMembersQuery {
    #[serde(default)]
    categorymembers: Vec<CategoryMemberItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    cmcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryMemberItem {
    #[serde(default)]
    pageid: i64,
    #[serde(default)]
    ns: i32,
    title: String,
    #[serde(rename = "type")]
    member_type: Option<String>,
}
