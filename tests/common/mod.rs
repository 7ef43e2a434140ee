use std::collections::BTreeMap;

use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use server::catalog::ChallengeCatalog;
use server::config::Config;

/// Build a reqwest client for tests. Redirects are returned, not followed.
pub fn client() -> Client {
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("Failed to build client")
}

/// Serve the app on an ephemeral port and return its base URL.
pub async fn spawn_app(config: Config) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address");
    let catalog = ChallengeCatalog::builtin().expect("Built-in challenge");
    let app = server::app(config, catalog);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server error");
    });
    format!("http://{addr}")
}

pub fn test_config() -> Config {
    Config {
        secret_key: "integration-test-secret".into(),
        ..Config::default()
    }
}

/// A browser stand-in that keeps its cookies between requests.
pub struct Player {
    client: Client,
    base_url: String,
    pub cookies: BTreeMap<String, String>,
    pub htmx: bool,
}

impl Player {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: client(),
            base_url: base_url.to_string(),
            cookies: BTreeMap::new(),
            htmx: false,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn absorb(&mut self, response: &Response) {
        for header in response.headers().get_all(SET_COOKIE) {
            let raw = header.to_str().expect("Set-Cookie is ASCII");
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                self.cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }

    pub async fn send(&mut self, method: reqwest::Method, path: &str) -> Response {
        let mut request = self.client.request(method, self.url(path));
        if !self.cookies.is_empty() {
            request = request.header(COOKIE, self.cookie_header());
        }
        if self.htmx {
            request = request.header("HX-Request", "true");
        }
        let response = request.send().await.expect("Failed to send request");
        self.absorb(&response);
        response
    }

    pub async fn get(&mut self, path: &str) -> (StatusCode, Value) {
        let response = self.send(reqwest::Method::GET, path).await;
        (response.status(), response.json().await.unwrap_or(Value::Null))
    }

    pub async fn post(&mut self, path: &str) -> (StatusCode, Value) {
        let response = self.send(reqwest::Method::POST, path).await;
        (response.status(), response.json().await.unwrap_or(Value::Null))
    }
}
