use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::html::{self, Form};
use crate::models::{AuthenticatedPage, Credentials};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected page structure: {0}")]
    Structure(String),

    #[error("portal rejected the credentials")]
    Credential { invalid_phrase_seen: bool },

    #[error("login outcome could not be determined")]
    Unknown,
}

/// Which evidence on the post-login page proved the login worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginSignal {
    FullName,
    AttendanceChart,
    MarksChart,
}

/// Logs into the portal the way a browser would: load the login page, copy
/// the form's hidden fields, post the credentials back.
#[derive(Debug, Clone)]
pub struct FormLoginClient {
    config: PortalConfig,
}

impl FormLoginClient {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }

    /// One login attempt with a fresh cookie jar. Every failure is logged
    /// and reported as `None`; there are no retries.
    #[tracing::instrument(skip_all, fields(identifier = %credentials.identifier))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Option<AuthenticatedPage> {
        match self.login(credentials).await {
            Ok(page) => Some(page),
            Err(LoginError::Credential { invalid_phrase_seen }) => {
                warn!(invalid_phrase_seen, "login rejected, portal returned the login form");
                None
            }
            Err(err) => {
                warn!(error = %err, "login failed");
                None
            }
        }
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthenticatedPage, LoginError> {
        let client = self.build_client()?;
        let login_url = Url::parse(&self.config.login_url)
            .map_err(|e| LoginError::Structure(format!("bad login url: {e}")))?;

        debug!(url = %login_url, "fetching login page");
        let login_page = client
            .get(login_url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let form = html::find_form(&login_page, &self.config.login_form_id).ok_or_else(|| {
            LoginError::Structure(format!(
                "no form with id '{}' on login page",
                self.config.login_form_id
            ))
        })?;
        let payload = self.payload(credentials, &form);
        let submit_url = self.submission_url(&login_url, &form)?;

        debug!(url = %submit_url, fields = payload.len(), "submitting login form");
        let body = client
            .post(submit_url)
            .form(&payload)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let signal = self.classify(&body, credentials)?;
        info!(?signal, "login succeeded");
        Ok(AuthenticatedPage {
            session: client,
            html: body,
        })
    }

    fn build_client(&self) -> Result<Client, LoginError> {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.config.login_url) {
            Ok(referer) => {
                headers.insert(REFERER, referer);
            }
            Err(_) => warn!("login url is not a valid header value, sending no referer"),
        }

        let mut builder = Client::builder()
            .cookie_store(true)
            .timeout(self.config.request_timeout())
            .user_agent(self.config.user_agent.as_str())
            .default_headers(headers);
        if !self.config.use_system_proxy {
            builder = builder.no_proxy();
        }
        Ok(builder.build()?)
    }

    /// The five credential fields followed by the form's hidden inputs.
    /// Hidden inputs never replace a credential field.
    pub fn payload(&self, credentials: &Credentials, form: &Form<'_>) -> Vec<(String, String)> {
        let fields = &self.config.fields;
        let mut payload = vec![
            (fields.identifier.clone(), credentials.identifier.clone()),
            (fields.day.clone(), credentials.day()),
            (fields.month.clone(), credentials.month()),
            (fields.year.clone(), credentials.year()),
            (fields.password.clone(), credentials.password()),
        ];

        for (name, value) in form.hidden_inputs() {
            if fields.contains(&name) {
                continue;
            }
            match payload.iter_mut().find(|(existing, _)| *existing == name) {
                Some(entry) => entry.1 = value,
                None => payload.push((name, value)),
            }
        }
        payload
    }

    fn submission_url(&self, login_url: &Url, form: &Form<'_>) -> Result<Url, LoginError> {
        match form.attribute("action").map(str::trim).filter(|a| !a.is_empty()) {
            Some(action) => login_url
                .join(action)
                .map_err(|e| LoginError::Structure(format!("bad form action '{action}': {e}"))),
            None => Url::parse(&self.config.form_action_fallback)
                .map_err(|e| LoginError::Structure(format!("bad form action fallback: {e}"))),
        }
    }

    /// Decides from the post-login page whether the login worked, checking
    /// the strongest evidence first.
    pub fn classify(&self, body: &str, credentials: &Credentials) -> Result<LoginSignal, LoginError> {
        let name = credentials.expected_full_name.trim();
        if !name.is_empty() && body.to_lowercase().contains(&name.to_lowercase()) {
            return Ok(LoginSignal::FullName);
        }
        if body.contains(&format!("id=\"{}\"", self.config.attendance_chart_id)) {
            return Ok(LoginSignal::AttendanceChart);
        }
        if body.contains(&format!("id=\"{}\"", self.config.marks_chart_id)) {
            return Ok(LoginSignal::MarksChart);
        }

        if html::find_form(body, &self.config.login_form_id).is_some() {
            let phrase = self.config.invalid_credentials_phrase.to_lowercase();
            let invalid_phrase_seen = !phrase.is_empty() && body.to_lowercase().contains(&phrase);
            return Err(LoginError::Credential {
                invalid_phrase_seen,
            });
        }
        Err(LoginError::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl Recorded {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        fn form_fields(&self) -> Vec<(String, String)> {
            self.body
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }
    }

    struct Reply {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: String,
    }

    impl Reply {
        fn ok(body: impl Into<String>) -> Self {
            Self {
                status: 200,
                headers: Vec::new(),
                body: body.into(),
            }
        }
    }

    type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

    fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    async fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let body_end = buf.len().min(header_end + content_length);
        let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();

        Some(Recorded {
            method,
            path,
            headers,
            body,
        })
    }

    async fn spawn_portal(handler: Handler) -> (SocketAddr, Arc<Mutex<Vec<Recorded>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("addr");
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_bg = Arc::clone(&log);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let Some(request) = read_request(&mut stream).await else {
                    continue;
                };
                let reply = handler(&request);
                log_bg.lock().expect("log lock").push(request);

                let mut head = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n",
                    reply.status,
                    reply.body.len()
                );
                for (name, value) in &reply.headers {
                    head.push_str(&format!("{name}: {value}\r\n"));
                }
                head.push_str("\r\n");
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(reply.body.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (addr, log)
    }

    fn config_for(addr: SocketAddr) -> PortalConfig {
        PortalConfig {
            login_url: format!("http://{addr}/parents/index.php"),
            form_action_fallback: format!("http://{addr}/fallback"),
            request_timeout_secs: 5,
            use_system_proxy: false,
            ..PortalConfig::default()
        }
    }

    fn credentials() -> Credentials {
        Credentials::new(
            "PRN001",
            NaiveDate::from_ymd_opt(2004, 3, 7).unwrap(),
            "Avery Lee",
        )
    }

    const LOGIN_FORM: &str = r#"<html><body>
        <form id="login-form" method="post" action="index.php?task=login">
            <input type="text" name="username" value="">
            <input type="hidden" name="username" value="overwritten">
            <input type="hidden" name="csrf_token" value="tok123">
            <input type="hidden" name="return" value="">
        </form></body></html>"#;

    fn portal(post_reply: fn() -> Reply) -> Handler {
        Arc::new(move |req: &Recorded| match req.method.as_str() {
            "GET" => Reply {
                status: 200,
                headers: vec![("Set-Cookie", "sid=abc123; Path=/".to_string())],
                body: LOGIN_FORM.to_string(),
            },
            _ => post_reply(),
        })
    }

    #[tokio::test]
    async fn logs_in_and_returns_dashboard() {
        let (addr, log) =
            spawn_portal(portal(|| Reply::ok("<h1>Welcome AVERY LEE</h1>"))).await;
        let client = FormLoginClient::new(config_for(addr));

        let page = client.authenticate(&credentials()).await.expect("login");
        assert!(page.html.contains("Welcome AVERY LEE"));

        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 2);
        let post = &log[1];
        assert_eq!(post.method, "POST");
        assert_eq!(post.path, "/parents/index.php?task=login");
        assert_eq!(
            post.form_fields(),
            vec![
                ("username".to_string(), "PRN001".to_string()),
                ("dd".to_string(), "07".to_string()),
                ("mm".to_string(), "03".to_string()),
                ("yyyy".to_string(), "2004".to_string()),
                ("passwd".to_string(), "2004-03-07".to_string()),
                ("csrf_token".to_string(), "tok123".to_string()),
                ("return".to_string(), String::new()),
            ]
        );
    }

    #[tokio::test]
    async fn session_cookie_is_sent_with_the_post() {
        let (addr, log) = spawn_portal(portal(|| Reply::ok("Avery Lee"))).await;
        let client = FormLoginClient::new(config_for(addr));
        client.authenticate(&credentials()).await.expect("login");

        let log = log.lock().unwrap().clone();
        let cookie = log[1].header("cookie").unwrap_or_default();
        assert!(cookie.contains("sid=abc123"), "cookie header: {cookie}");
        assert!(log[0].header("referer").is_some());
    }

    #[tokio::test]
    async fn chart_marker_counts_as_success() {
        let (addr, _) = spawn_portal(portal(|| {
            Reply::ok(r#"<div id="stackedBarChart_1"></div>"#)
        }))
        .await;
        let client = FormLoginClient::new(config_for(addr));
        assert!(client.authenticate(&credentials()).await.is_some());
    }

    #[tokio::test]
    async fn returned_login_form_is_a_credential_failure() {
        let (addr, _) = spawn_portal(portal(|| {
            Reply::ok(format!("<p>Invalid username or password</p>{LOGIN_FORM}"))
        }))
        .await;
        let client = FormLoginClient::new(config_for(addr));

        let err = client.login(&credentials()).await.unwrap_err();
        assert!(matches!(
            err,
            LoginError::Credential {
                invalid_phrase_seen: true
            }
        ));
        assert!(client.authenticate(&credentials()).await.is_none());
    }

    #[tokio::test]
    async fn unrecognised_page_is_unknown() {
        let (addr, _) = spawn_portal(portal(|| Reply::ok("<p>Down for maintenance</p>"))).await;
        let client = FormLoginClient::new(config_for(addr));
        let err = client.login(&credentials()).await.unwrap_err();
        assert!(matches!(err, LoginError::Unknown));
    }

    #[tokio::test]
    async fn missing_form_is_a_structure_error() {
        let handler: Handler = Arc::new(|_req: &Recorded| Reply::ok("<html>no form</html>"));
        let (addr, log) = spawn_portal(handler).await;
        let client = FormLoginClient::new(config_for(addr));

        let err = client.login(&credentials()).await.unwrap_err();
        assert!(matches!(err, LoginError::Structure(_)));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_is_a_network_error() {
        let handler: Handler = Arc::new(|_req: &Recorded| Reply {
            status: 503,
            headers: Vec::new(),
            body: String::new(),
        });
        let (addr, _) = spawn_portal(handler).await;
        let client = FormLoginClient::new(config_for(addr));

        let err = client.login(&credentials()).await.unwrap_err();
        assert!(matches!(err, LoginError::Network(_)));
        assert!(client.authenticate(&credentials()).await.is_none());
    }

    #[tokio::test]
    async fn form_without_action_posts_to_fallback() {
        let handler: Handler = Arc::new(|req: &Recorded| match req.method.as_str() {
            "GET" => Reply::ok(r#"<form id="login-form"></form>"#),
            _ => Reply::ok("Avery Lee"),
        });
        let (addr, log) = spawn_portal(handler).await;
        let client = FormLoginClient::new(config_for(addr));
        client.authenticate(&credentials()).await.expect("login");

        assert_eq!(log.lock().unwrap()[1].path, "/fallback");
    }

    #[test]
    fn blank_name_is_not_evidence() {
        let client = FormLoginClient::new(PortalConfig::default());
        let creds = Credentials::new("PRN001", NaiveDate::from_ymd_opt(2004, 3, 7).unwrap(), " ");
        assert!(matches!(
            client.classify("<p>anything</p>", &creds),
            Err(LoginError::Unknown)
        ));
    }

    #[test]
    fn signals_are_checked_in_order() {
        let client = FormLoginClient::new(PortalConfig::default());
        let body = r#"avery lee <div id="gaugeTypeMulti"></div>"#;
        assert_eq!(
            client.classify(body, &credentials()).unwrap(),
            LoginSignal::FullName
        );
        let body = r#"<div id="gaugeTypeMulti"></div><div id="stackedBarChart_1"></div>"#;
        assert_eq!(
            client.classify(body, &credentials()).unwrap(),
            LoginSignal::AttendanceChart
        );
    }
}
