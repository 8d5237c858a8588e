//! Installed-app OAuth against Google: a loopback redirect listener, PKCE
//! and a random `state`. Tokens live only in the session store and are
//! never refreshed.

use crate::config::GoogleConfig;
use crate::error::AuthError;
use crate::storage::KeyValueStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const REDIRECT_DEADLINE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeSet {
    Calendar,
    Workspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prompt {
    #[default]
    Consent,
    SelectAccount,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

impl ScopeSet {
    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            ScopeSet::Calendar => &["https://www.googleapis.com/auth/calendar.readonly"],
            ScopeSet::Workspace => &[
                "https://www.googleapis.com/auth/drive.file",
                "https://www.googleapis.com/auth/documents",
                "https://www.googleapis.com/auth/gmail.send",
            ],
        }
    }

    pub fn store_key(&self) -> &'static str {
        match self {
            ScopeSet::Calendar => "token-calendar",
            ScopeSet::Workspace => "token-workspace",
        }
    }
}

impl Prompt {
    pub fn query_value(&self) -> &'static str {
        match self {
            Prompt::Consent => "consent",
            Prompt::SelectAccount => "select_account",
            Prompt::None => "none",
        }
    }
}

impl OAuthToken {
    pub fn is_usable(&self, now_ms: i64) -> bool {
        !self.access_token.is_empty() && now_ms < self.expires_at
    }
}

pub fn load_token(store: &dyn KeyValueStore, scope: ScopeSet) -> Option<OAuthToken> {
    let raw = match store.get(scope.store_key()) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(error = %err, "session store unreadable");
            return None;
        }
    };
    serde_json::from_str(&raw).ok()
}

pub fn save_token(store: &dyn KeyValueStore, scope: ScopeSet, token: &OAuthToken) {
    let encoded = match serde_json::to_string(token) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(error = %err, "could not encode token");
            return;
        }
    };
    if let Err(err) = store.set(scope.store_key(), &encoded) {
        warn!(error = %err, "could not store token");
    }
}

/// A stored token that has not expired yet. Never triggers a flow.
pub fn usable_token(store: &dyn KeyValueStore, scope: ScopeSet, now_ms: i64) -> Option<OAuthToken> {
    load_token(store, scope).filter(|token| token.is_usable(now_ms))
}

/// Verifier and S256 challenge for one authorization attempt.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        Self::from_verifier(random_string(64))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Pkce {
            verifier,
            challenge,
        }
    }
}

pub fn authorization_url(
    config: &GoogleConfig,
    scope: ScopeSet,
    prompt: Prompt,
    redirect_uri: &str,
    state: &str,
    pkce: &Pkce,
) -> Result<Url, AuthError> {
    let scopes = scope.scopes().join(" ");
    let url = Url::parse_with_params(
        AUTH_ENDPOINT,
        [
            ("client_id", config.client_id.trim()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scopes.as_str()),
            ("prompt", prompt.query_value()),
            ("include_granted_scopes", "true"),
            ("state", state),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
        ],
    )?;
    Ok(url)
}

/// Runs the whole flow and stores the token on success. `Ok(None)` means
/// the user backed out or the redirect carried an error.
pub fn authorize(
    config: &GoogleConfig,
    store: &dyn KeyValueStore,
    scope: ScopeSet,
    prompt: Prompt,
) -> Result<Option<OAuthToken>, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let redirect_uri = format!("http://{}", listener.local_addr()?);
    let state = random_string(32);
    let pkce = Pkce::generate();
    let url = authorization_url(config, scope, prompt, &redirect_uri, &state, &pkce)?;

    info!(scope = ?scope, %redirect_uri, "starting authorization");
    if let Err(err) = open::that(url.as_str()) {
        warn!(error = %err, %url, "could not open browser; visit the url manually");
    }

    let (mut stream, params) = wait_for_redirect(&listener, REDIRECT_DEADLINE)?;

    if let Some(error) = params.get("error") {
        let _ = respond(&mut stream, "Authorization was not granted. You can close this window.");
        info!(%error, "authorization declined");
        return Ok(None);
    }
    if params.get("state").map(String::as_str) != Some(state.as_str()) {
        let _ = respond(&mut stream, "Invalid state.");
        return Err(AuthError::StateMismatch);
    }
    let Some(code) = params.get("code") else {
        let _ = respond(&mut stream, "Missing authorization code.");
        return Err(AuthError::Denied("missing authorization code".into()));
    };

    let token = match exchange_code(config, code, &redirect_uri, &pkce) {
        Ok(token) => token,
        Err(err) => {
            let _ = respond(&mut stream, "Authorization failed.");
            return Err(err);
        }
    };
    let _ = respond(&mut stream, "Authorization complete. You can close this window.");
    save_token(store, scope, &token);
    info!(scope = ?scope, "authorization complete");
    Ok(Some(token))
}

/// Accepts loopback connections until one carries the authorization
/// response. Idle preconnects and stray requests are dropped.
fn wait_for_redirect(
    listener: &TcpListener,
    deadline: Duration,
) -> Result<(TcpStream, HashMap<String, String>), AuthError> {
    listener.set_nonblocking(true)?;
    let started = Instant::now();
    loop {
        if started.elapsed() >= deadline {
            return Err(AuthError::TimedOut);
        }
        match listener.accept() {
            Ok((mut stream, _)) => {
                stream.set_nonblocking(false)?;
                match read_redirect(&mut stream) {
                    Ok(params) if is_redirect(&params) => return Ok((stream, params)),
                    Ok(_) => debug!("ignoring loopback request without authorization parameters"),
                    Err(err) => debug!(error = %err, "ignoring unreadable loopback connection"),
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(200));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_redirect(params: &HashMap<String, String>) -> bool {
    ["code", "error", "state"]
        .iter()
        .any(|key| params.contains_key(*key))
}

fn read_redirect(stream: &mut TcpStream) -> Result<HashMap<String, String>, AuthError> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut request_line = String::new();
    BufReader::new(&*stream).read_line(&mut request_line)?;
    debug!(request = request_line.trim_end(), "redirect received");
    Ok(parse_request_line(&request_line))
}

/// Query parameters from `GET /?code=..&state=.. HTTP/1.1`.
pub fn parse_request_line(line: &str) -> HashMap<String, String> {
    let target = line.split_whitespace().nth(1).unwrap_or("/");
    let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn exchange_code(
    config: &GoogleConfig,
    code: &str,
    redirect_uri: &str,
    pkce: &Pkce,
) -> Result<OAuthToken, AuthError> {
    let mut form = vec![
        ("client_id", config.client_id.trim()),
        ("code", code),
        ("code_verifier", pkce.verifier.as_str()),
        ("redirect_uri", redirect_uri),
        ("grant_type", "authorization_code"),
    ];
    if let Some(secret) = config.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    let response = Client::new().post(TOKEN_ENDPOINT).form(&form).send()?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(AuthError::TokenEndpoint(format!("{status}: {body}")));
    }
    let token: TokenResponse = response.json()?;
    let expires_in = token.expires_in.unwrap_or(3600);
    Ok(OAuthToken {
        access_token: token.access_token,
        expires_at: Utc::now().timestamp_millis() + expires_in * 1000,
    })
}

fn respond(stream: &mut TcpStream, message: &str) -> io::Result<()> {
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn pkce_challenge_matches_rfc_example() {
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn generated_verifier_is_long_enough() {
        let pkce = Pkce::generate();
        assert!(pkce.verifier.len() >= 43);
        assert!(!pkce.challenge.contains('='));
    }

    #[test]
    fn request_line_query_is_decoded() {
        let params = parse_request_line("GET /?code=4%2F0Ab&state=xyz&scope=a+b HTTP/1.1\r\n");
        assert_eq!(params.get("code").map(String::as_str), Some("4/0Ab"));
        assert_eq!(params.get("state").map(String::as_str), Some("xyz"));
        assert_eq!(params.get("scope").map(String::as_str), Some("a b"));
        assert!(parse_request_line("GET / HTTP/1.1").is_empty());
    }

    #[test]
    fn authorization_url_carries_pkce_and_prompt() {
        let config = GoogleConfig {
            client_id: "client-1".into(),
            client_secret: None,
        };
        let pkce = Pkce::from_verifier("v".repeat(43));
        let url = authorization_url(
            &config,
            ScopeSet::Workspace,
            Prompt::SelectAccount,
            "http://127.0.0.1:4000",
            "st",
            &pkce,
        )
        .unwrap();
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["prompt"], "select_account");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["code_challenge"], pkce.challenge);
        assert_eq!(query["state"], "st");
        assert!(query["scope"].contains("gmail.send"));
    }

    #[test]
    fn token_expires_at_its_deadline() {
        let token = OAuthToken {
            access_token: "t".into(),
            expires_at: 100_000,
        };
        assert!(token.is_usable(99_999));
        assert!(!token.is_usable(100_000));
        let blank = OAuthToken {
            access_token: String::new(),
            expires_at: i64::MAX,
        };
        assert!(!blank.is_usable(0));
    }

    #[test]
    fn tokens_are_kept_per_scope_set() {
        let store = MemoryStore::new();
        let token = OAuthToken {
            access_token: "cal".into(),
            expires_at: 600_000,
        };
        save_token(&store, ScopeSet::Calendar, &token);
        assert_eq!(usable_token(&store, ScopeSet::Calendar, 0), Some(token));
        assert_eq!(usable_token(&store, ScopeSet::Workspace, 0), None);
        assert_eq!(usable_token(&store, ScopeSet::Calendar, 600_000), None);
    }

    #[test]
    fn redirect_skips_idle_and_unrelated_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            drop(TcpStream::connect(addr).unwrap());
            let mut favicon = TcpStream::connect(addr).unwrap();
            favicon.write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n").unwrap();
            let mut redirect = TcpStream::connect(addr).unwrap();
            redirect
                .write_all(b"GET /?code=abc&state=s1 HTTP/1.1\r\n\r\n")
                .unwrap();
            (favicon, redirect)
        });

        let (_stream, params) = wait_for_redirect(&listener, Duration::from_secs(30)).unwrap();
        assert_eq!(params.get("code").map(String::as_str), Some("abc"));
        assert_eq!(params.get("state").map(String::as_str), Some("s1"));
        let _open = client.join().unwrap();
    }

    #[test]
    fn unconfigured_client_is_rejected_before_listening() {
        let store = MemoryStore::new();
        let err = authorize(&GoogleConfig::default(), &store, ScopeSet::Calendar, Prompt::None)
            .unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured));
    }
}
