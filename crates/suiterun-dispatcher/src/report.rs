//! Run reporting.

use async_trait::async_trait;
use serde::Serialize;
use suiterun_core::{Run, RunSettings};
use suiterun_store::SecretStore;
use tracing::{debug, info, warn};

use crate::DispatchError;

/// Secret key listing the product owners, comma separated.
pub const OWNERS_KEY: &str = "owners";

/// Secret key holding the report template location.
pub const EMAIL_TEMPLATE_KEY: &str = "email.path.template";

/// Delivers the report of a finished run.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(
        &self,
        run: &Run,
        recipients: &[String],
        template: Option<&str>,
    ) -> Result<(), DispatchError>;
}

/// Reporting configuration of a product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportConfig {
    pub owners: Vec<String>,
    pub template: Option<String>,
}

impl ReportConfig {
    /// Read the configuration from secret `name`. A missing or unreadable
    /// secret yields no owners and no template.
    pub async fn load(secrets: &dyn SecretStore, name: &str) -> Self {
        let owners = match secrets.get_string(name, OWNERS_KEY).await {
            Ok(Some(owners)) => split_addresses(&owners),
            Ok(None) => {
                warn!(secret = %name, "No owners configured, reporting without them");
                Vec::new()
            }
            Err(e) => {
                warn!(secret = %name, error = %e, "Failed to read reporting configuration");
                Vec::new()
            }
        };

        let template = match secrets.get_string(name, EMAIL_TEMPLATE_KEY).await {
            Ok(template) => template.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(secret = %name, error = %e, "Failed to read report template");
                None
            }
        };
        if template.is_none() {
            info!(secret = %name, "No report template configured, using the generic one");
        }

        Self { owners, template }
    }
}

/// Who receives the report: the owners only for official runs, plus the
/// user who queued the run.
pub fn recipients(settings: &RunSettings, owners: &[String]) -> Vec<String> {
    let mut recipients = if settings.is_official() {
        owners.to_vec()
    } else {
        Vec::new()
    };

    if let Some(email) = settings.user_email.as_deref().map(str::trim) {
        if !email.is_empty() && !recipients.iter().any(|r| r == email) {
            recipients.push(email.to_string());
        }
    }
    recipients
}

fn split_addresses(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    run_id: String,
    receivers: String,
    template: &'a str,
}

/// Asks the e-mail service to send the report.
#[derive(Clone)]
pub struct EmailReporter {
    inner: reqwest::Client,
    endpoint: String,
}

impl EmailReporter {
    pub fn new(endpoint: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Reporter for EmailReporter {
    async fn report(
        &self,
        run: &Run,
        recipients: &[String],
        template: Option<&str>,
    ) -> Result<(), DispatchError> {
        let body = ReportRequest {
            run_id: run.id.to_string(),
            receivers: recipients.join(","),
            template: template.unwrap_or_default(),
        };
        debug!(run_id = %run.id, receivers = %body.receivers, "Sending report request");

        let response = self
            .inner
            .post(format!("{}/report", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Report(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(DispatchError::Report(format!(
                "e-mail service answered {}",
                response.status()
            )));
        }

        info!(run_id = %run.id, recipients = recipients.len(), "Report requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use suiterun_core::{keys, RunId};
    use suiterun_store::MemorySecrets;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    fn settings(remark: Option<&str>, email: Option<&str>) -> RunSettings {
        let mut map = HashMap::new();
        if let Some(remark) = remark {
            map.insert(keys::REMARK.to_string(), json!(remark));
        }
        if let Some(email) = email {
            map.insert(keys::USER_EMAIL.to_string(), json!(email));
        }
        RunSettings::from_settings(&map).unwrap()
    }

    fn owners() -> Vec<String> {
        vec!["a@x.io".to_string(), "b@x.io".to_string()]
    }

    #[test]
    fn test_recipients_official() {
        let got = recipients(&settings(Some("Official"), Some("me@x.io")), &owners());
        assert_eq!(got, vec!["a@x.io", "b@x.io", "me@x.io"]);
    }

    #[test]
    fn test_recipients_unofficial() {
        let got = recipients(&settings(Some("try"), Some("me@x.io")), &owners());
        assert_eq!(got, vec!["me@x.io"]);

        assert!(recipients(&settings(None, None), &owners()).is_empty());
    }

    #[test]
    fn test_recipients_no_duplicates() {
        let got = recipients(&settings(Some("official"), Some("a@x.io")), &owners());
        assert_eq!(got, vec!["a@x.io", "b@x.io"]);
    }

    #[tokio::test]
    async fn test_load_report_config() {
        let secrets = MemorySecrets::new();
        assert_eq!(
            ReportConfig::load(&secrets, "demo").await,
            ReportConfig::default()
        );

        secrets.insert("demo", OWNERS_KEY, "a@x.io, ,b@x.io\n").await;
        secrets
            .insert("demo", EMAIL_TEMPLATE_KEY, "https://t/email.html")
            .await;
        let config = ReportConfig::load(&secrets, "demo").await;
        assert_eq!(config.owners, owners());
        assert_eq!(config.template.as_deref(), Some("https://t/email.html"));
    }

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn serve(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let router = Router::new()
            .route(
                "/report",
                post(
                    move |State(received): State<Received>, Json(body): Json<Value>| async move {
                        received.lock().await.push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), received)
    }

    #[tokio::test]
    async fn test_email_reporter() {
        let (url, received) = serve(StatusCode::OK).await;
        let reporter = EmailReporter::new(&url);
        let run = Run::new(RunId::new(42), "nightly");

        reporter
            .report(&run, &owners(), Some("https://t/email.html"))
            .await
            .unwrap();

        let received = received.lock().await;
        assert_eq!(
            received[0],
            json!({"run_id": "42", "receivers": "a@x.io,b@x.io", "template": "https://t/email.html"})
        );
    }

    #[tokio::test]
    async fn test_email_reporter_non_ok() {
        let (url, _) = serve(StatusCode::BAD_GATEWAY).await;
        let reporter = EmailReporter::new(&url);
        let run = Run::new(RunId::new(1), "r");

        assert!(matches!(
            reporter.report(&run, &owners(), None).await,
            Err(DispatchError::Report(_))
        ));
    }
}
