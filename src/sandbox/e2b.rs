//! E2B sandbox provider: HTTP client for the E2B REST API.
//!
//! Attaches to a sandbox that is already running; the REST API offers
//! command execution and preview hosts but no directory watch, so projects
//! in E2B sandboxes are always watched by polling.

use super::{CommandOutput, SandboxClient};
use async_trait::async_trait;

/// Base URL for the E2B REST API.
pub const E2B_API_BASE: &str = "https://api.e2b.dev";

/// HTTP client bound to one E2B sandbox.
pub struct E2bSandboxClient {
    api_key: String,
    sandbox_id: String,
    base_url: String,
    http: reqwest::Client,
}

impl E2bSandboxClient {
    pub fn attach(api_key: impl Into<String>, sandbox_id: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build reqwest client: {e}"))?;

        Ok(Self {
            api_key: api_key.into(),
            sandbox_id: sandbox_id.into(),
            base_url: E2B_API_BASE.to_string(),
            http,
        })
    }

    /// Point the client at a different API host (self-hosted E2B, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn effective_key(&self) -> String {
        std::env::var("E2B_API_KEY").unwrap_or_else(|_| self.api_key.clone())
    }
}

#[async_trait]
impl SandboxClient for E2bSandboxClient {
    fn id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run_command(
        &self,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CommandOutput> {
        let api_key = self.effective_key();
        let url = format!(
            "{}/v0/sandboxes/{}/commands",
            self.base_url,
            urlencoding::encode(&self.sandbox_id)
        );

        let body = serde_json::json!({
            "cmd": command,
            "workdir": workdir,
            "timeout": timeout_ms.div_ceil(1000),
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .timeout(std::time::Duration::from_millis(timeout_ms.saturating_add(5_000)))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B run_command request failed: {e}"))?;

        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string());

        if status == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("E2B sandbox {} not found", self.sandbox_id);
        }

        anyhow::ensure!(
            status.is_success(),
            "E2B API returned {status}: {body_text}"
        );

        let parsed: serde_json::Value = serde_json::from_str(&body_text)
            .map_err(|e| anyhow::anyhow!("Failed to parse E2B response: {e}\nBody: {body_text}"))?;

        Ok(CommandOutput {
            stdout: parsed["stdout"].as_str().unwrap_or("").to_string(),
            stderr: parsed["stderr"].as_str().unwrap_or("").to_string(),
            exit_code: parsed["exitCode"]
                .as_i64()
                .or_else(|| parsed["exit_code"].as_i64())
                .unwrap_or(0),
        })
    }

    async fn get_preview_url(&self, port: u16) -> anyhow::Result<String> {
        let api_key = self.effective_key();
        let url = format!(
            "{}/v0/sandboxes/{}/hosts/{port}",
            self.base_url,
            urlencoding::encode(&self.sandbox_id)
        );

        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B get_preview_url request failed: {e}"))?;

        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string());

        anyhow::ensure!(
            status.is_success(),
            "E2B API returned {status}: {body_text}\nMake sure the dev server is running on port {port}."
        );

        Ok(normalize_preview_url(&body_text))
    }
}

/// The hosts endpoint answers with `{"url": ...}`, `{"host": ...}` or a bare
/// (possibly quoted) host name depending on API version.
fn normalize_preview_url(body_text: &str) -> String {
    let raw = match serde_json::from_str::<serde_json::Value>(body_text) {
        Ok(parsed) => parsed["url"]
            .as_str()
            .or_else(|| parsed["host"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body_text.trim().trim_matches('"').to_string()),
        Err(_) => body_text.trim().trim_matches('"').to_string(),
    };

    if raw.starts_with("http") {
        raw
    } else {
        format!("https://{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn attached_client_reports_id() {
        let client = E2bSandboxClient::attach("", "sb-abc").unwrap();
        assert_eq!(client.id(), "sb-abc");
        assert!(!client.base_url.ends_with('/'));
    }

    #[test]
    fn normalize_preview_url_variants() {
        assert_eq!(
            normalize_preview_url(r#"{"url":"https://3000-sb.e2b.app"}"#),
            "https://3000-sb.e2b.app"
        );
        assert_eq!(
            normalize_preview_url(r#"{"host":"3000-sb.e2b.app"}"#),
            "https://3000-sb.e2b.app"
        );
        assert_eq!(
            normalize_preview_url("\"3001-sb.e2b.app\"\n"),
            "https://3001-sb.e2b.app"
        );
    }

    #[tokio::test]
    async fn run_command_parses_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes/sb-1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stdout": "running\n",
                "stderr": "",
                "exitCode": 0
            })))
            .mount(&server)
            .await;

        let client = E2bSandboxClient::attach("key", "sb-1")
            .unwrap()
            .with_base_url(server.uri());
        let out = client.run_command("echo running", "/", 5_000).await.unwrap();
        assert_eq!(out.stdout.trim(), "running");
        assert!(out.success());
    }

    #[tokio::test]
    async fn run_command_reports_missing_sandbox() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes/gone/commands"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = E2bSandboxClient::attach("key", "gone")
            .unwrap()
            .with_base_url(server.uri());
        let err = client.run_command("true", "/", 1_000).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn e2b_has_no_native_watch() {
        let client = E2bSandboxClient::attach("", "sb").unwrap();
        assert!(!client.supports_native_watch().await);
        assert!(client.watch_dir("/home/user/project").await.is_err());
    }
}
