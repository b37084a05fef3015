//! CAPTCHA solving service client
//!
//! Speaks the 2captcha protocol: submit a base64 image to `/in.php`, then
//! poll `/res.php` until the answer is ready or the poll budget runs out.
//! Every failure collapses to `None`; callers keep a manual fallback.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CaptchaConfig;
use crate::media::ImagePayload;
use crate::poll::{PollPolicy, poll_until};
use crate::{Error, Result};

/// Reply text while the service is still working on a job
pub const NOT_READY: &str = "CAPCHA_NOT_READY";

/// Lifecycle of a submitted CAPTCHA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaStatus {
    Submitted,
    Polling,
    Solved,
    TimedOut,
    Failed,
}

/// A CAPTCHA accepted by the solving service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaJob {
    pub job_id: String,
    #[serde(skip)]
    pub image_payload: String,
    pub status: CaptchaStatus,
    pub solution: Option<String>,
    /// Status queries issued so far
    pub polls: u32,
}

impl CaptchaJob {
    fn new(job_id: String, image_payload: &str) -> Self {
        Self {
            job_id,
            image_payload: image_payload.to_string(),
            status: CaptchaStatus::Submitted,
            solution: None,
            polls: 0,
        }
    }
}

/// JSON reply of both service endpoints
#[derive(Debug, Deserialize)]
struct ServiceReply {
    status: i64,
    #[serde(default)]
    request: Option<String>,
    #[serde(default)]
    error_text: Option<String>,
}

/// CAPTCHA solver backed by a remote solving service
#[derive(Clone)]
pub struct CaptchaSolver {
    client: Client,
    config: CaptchaConfig,
}

impl CaptchaSolver {
    pub fn new(config: &CaptchaConfig) -> Result<Self> {
        let client = Client::builder().build().map_err(Error::Http)?;

        Ok(Self {
            client,
            config: CaptchaConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config.clone()
            },
        })
    }

    /// Solve a base64-encoded CAPTCHA image.
    ///
    /// `None` means "no answer": the submission was rejected, the poll
    /// budget ran out, or a request failed.
    pub async fn solve(&self, image_base64: &str) -> Option<String> {
        if self.config.api_key.is_empty() {
            warn!("No CAPTCHA API key configured, skipping automatic solving");
            return None;
        }

        let mut job = match self.submit(image_base64).await {
            Ok(job) => job,
            Err(e) => {
                error!("CAPTCHA solving error: {}", e);
                return None;
            }
        };

        self.wait_for_solution(&mut job).await;
        job.solution
    }

    /// Submit the image; the job is only returned when the service accepts it
    pub async fn submit(&self, image_base64: &str) -> Result<CaptchaJob> {
        let url = format!("{}/in.php", self.config.base_url);

        debug!("Submitting CAPTCHA ({} base64 chars)", image_base64.len());

        let reply: ServiceReply = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.submit_timeout_secs))
            .form(&[
                ("key", self.config.api_key.as_str()),
                ("method", "base64"),
                ("body", image_base64),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if reply.status != 1 {
            let reason = reply.error_text.or(reply.request).unwrap_or_default();
            return Err(Error::Captcha(format!("Failed to submit CAPTCHA: {}", reason)));
        }

        let job_id = reply
            .request
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Captcha("Submission accepted without a job id".to_string()))?;

        info!("CAPTCHA submitted, job id {}", job_id);
        Ok(CaptchaJob::new(job_id, image_base64))
    }

    /// Query a job once; `Ok(None)` while the answer is not ready
    pub async fn poll_once(&self, job_id: &str) -> Result<Option<String>> {
        let url = format!("{}/res.php", self.config.base_url);

        let reply: ServiceReply = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.poll_timeout_secs))
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("action", "get"),
                ("id", job_id),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if reply.status == 1 {
            return Ok(reply.request);
        }

        match reply.request.as_deref() {
            Some(NOT_READY) | None => {}
            Some(other) => warn!("CAPTCHA job {} not solved yet: {}", job_id, other),
        }
        Ok(None)
    }

    /// Poll until solved, timed out, or a request fails; updates `job`
    pub async fn wait_for_solution(&self, job: &mut CaptchaJob) {
        job.status = CaptchaStatus::Polling;
        let policy = PollPolicy::delayed(self.config.poll_interval(), self.config.max_polls);
        let job_id = job.job_id.as_str();

        let outcome = poll_until(policy, move |attempt| async move {
            debug!("Polling CAPTCHA job {} (attempt {})", job_id, attempt);
            match self.poll_once(job_id).await {
                Ok(Some(solution)) => Some((attempt, Ok(solution))),
                Ok(None) => None,
                Err(e) => Some((attempt, Err(e))),
            }
        })
        .await;

        match outcome {
            Some((polls, Ok(solution))) => {
                info!("CAPTCHA solved after {} polls", polls);
                job.polls = polls;
                job.status = CaptchaStatus::Solved;
                job.solution = Some(solution);
            }
            Some((polls, Err(e))) => {
                error!("CAPTCHA solving error: {}", e);
                job.polls = polls;
                job.status = CaptchaStatus::Failed;
            }
            None => {
                warn!("CAPTCHA solving timed out after {} polls", self.config.max_polls);
                job.polls = self.config.max_polls;
                job.status = CaptchaStatus::TimedOut;
            }
        }
    }

    /// Base64 body of a CAPTCHA image element's `src`.
    ///
    /// `data:` URLs are decoded in place; anything else is resolved against
    /// `page_url` and fetched.
    pub async fn image_to_base64(&self, src: &str, page_url: Option<&str>) -> Option<String> {
        if ImagePayload::is_data_url(src) {
            return match ImagePayload::from_data_url(src) {
                Some(payload) => Some(payload.data),
                None => {
                    warn!("Error getting image base64: unsupported data URL");
                    None
                }
            };
        }

        match self.fetch_image(src, page_url).await {
            Ok(bytes) => Some(STANDARD.encode(bytes)),
            Err(e) => {
                warn!("Error getting image base64: {}", e);
                None
            }
        }
    }

    async fn fetch_image(&self, src: &str, page_url: Option<&str>) -> Result<Vec<u8>> {
        let url = match page_url.and_then(|base| Url::parse(base).ok()) {
            Some(base) => base.join(src),
            None => Url::parse(src),
        }
        .map_err(|e| Error::Media(format!("Invalid image URL '{}': {}", src, e)))?;

        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.poll_timeout_secs))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn solver(server: &MockServer) -> CaptchaSolver {
        CaptchaSolver::new(&CaptchaConfig {
            api_key: "secret".to_string(),
            base_url: server.uri(),
            poll_interval_ms: 0,
            ..Default::default()
        })
        .unwrap()
    }

    async fn mount_submit(server: &MockServer, reply: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/in.php"))
            .and(body_string_contains("method=base64"))
            .and(body_string_contains("key=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .expect(1)
            .mount(server)
            .await;
    }

    fn not_ready() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"status": 0, "request": NOT_READY}))
    }

    #[tokio::test]
    async fn test_rejected_submission_never_polls() {
        let server = MockServer::start().await;
        mount_submit(&server, json!({"status": 0, "request": "ERROR_ZERO_BALANCE"})).await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(not_ready())
            .expect(0)
            .mount(&server)
            .await;

        assert_eq!(solver(&server).solve("aW1n").await, None);
    }

    #[tokio::test]
    async fn test_solution_on_first_ready_poll() {
        let server = MockServer::start().await;
        mount_submit(&server, json!({"status": 1, "request": "42"})).await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .and(query_param("id", "42"))
            .and(query_param("action", "get"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "x7k2p"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(solver(&server).solve("aW1n").await, Some("x7k2p".to_string()));
    }

    #[tokio::test]
    async fn test_solution_after_pending_polls() {
        let server = MockServer::start().await;
        mount_submit(&server, json!({"status": 1, "request": "42"})).await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(not_ready())
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "abc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let solver = solver(&server);
        let mut job = solver.submit("aW1n").await.unwrap();
        assert_eq!(job.status, CaptchaStatus::Submitted);

        solver.wait_for_solution(&mut job).await;
        assert_eq!(job.status, CaptchaStatus::Solved);
        assert_eq!(job.polls, 3);
        assert_eq!(job.solution.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_times_out_after_poll_budget() {
        let server = MockServer::start().await;
        mount_submit(&server, json!({"status": 1, "request": "42"})).await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(not_ready())
            .expect(20)
            .mount(&server)
            .await;

        let solver = solver(&server);
        let mut job = solver.submit("aW1n").await.unwrap();
        solver.wait_for_solution(&mut job).await;

        assert_eq!(job.status, CaptchaStatus::TimedOut);
        assert_eq!(job.polls, 20);
        assert!(job.solution.is_none());
    }

    #[tokio::test]
    async fn test_poll_error_stops_polling() {
        let server = MockServer::start().await;
        mount_submit(&server, json!({"status": 1, "request": "42"})).await;
        Mock::given(method("GET"))
            .and(path("/res.php"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(solver(&server).solve("aW1n").await, None);
    }

    #[tokio::test]
    async fn test_missing_api_key_skips_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let solver = CaptchaSolver::new(&CaptchaConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(solver.solve("aW1n").await, None);
    }

    #[tokio::test]
    async fn test_image_to_base64_data_url() {
        let server = MockServer::start().await;
        let solver = solver(&server);
        let data = solver
            .image_to_base64("data:image/png;base64,dGVzdA==", None)
            .await;
        assert_eq!(data.as_deref(), Some("dGVzdA=="));
    }

    #[tokio::test]
    async fn test_image_to_base64_fetches_relative_src() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/captcha/image.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"test".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let solver = solver(&server);
        let page = format!("{}/search", server.uri());
        let data = solver.image_to_base64("/captcha/image.png", Some(&page)).await;
        assert_eq!(data.as_deref(), Some("dGVzdA=="));
    }

    #[tokio::test]
    async fn test_image_to_base64_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let solver = solver(&server);
        let src = format!("{}/missing.png", server.uri());
        assert!(solver.image_to_base64(&src, None).await.is_none());
        assert!(solver.image_to_base64("not a url", None).await.is_none());
    }
}
