use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::commands::ClientArgs;
use crate::auth::authorization_header;
use crate::types::ConflictInfo;

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    key: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
    pub code: Option<String>,
}

impl ApiClient {
    pub fn new(args: &ClientArgs) -> anyhow::Result<Self> {
        // Publishing may take a while; the server enforces its own bound.
        let client = Client::builder().timeout(Duration::from_secs(900)).build()?;
        let key = match (&args.key_id, &args.secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            (None, None) => None,
            _ => anyhow::bail!("--key-id and --secret must be given together"),
        };
        Ok(Self {
            client,
            base_url: args.server.trim_end_matches('/').to_string(),
            key,
        })
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}/api/v1{}", self.base_url, path);
        let resp = self.client.get(&url).send()?;
        self.handle_response(resp)
    }

    pub fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        self.signed(Method::POST, path, serde_json::to_vec(body)?)
    }

    pub fn delete<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.signed(Method::DELETE, path, Vec::new())
    }

    fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> anyhow::Result<T> {
        let (key_id, secret) = self
            .key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("This command needs --key-id and --secret"))?;

        let path_and_query = format!("/api/v1{path}");
        let authorization =
            authorization_header(key_id, secret, method.as_str(), &path_and_query, &body);

        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = self
            .client
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;
        self.handle_response(resp)
    }

    fn handle_response<T: DeserializeOwned>(&self, resp: Response) -> anyhow::Result<T> {
        if resp.status().is_success() {
            let api_resp: ApiResponse<T> = resp.json()?;
            return api_resp
                .data
                .ok_or_else(|| anyhow::anyhow!("Server returned an empty response"));
        }

        let status = resp.status();
        let api_resp: ApiResponse<serde_json::Value> = resp
            .json()
            .map_err(|_| anyhow::anyhow!("Server error ({status})"))?;
        let message = api_resp
            .error
            .unwrap_or_else(|| "Server error (no details provided)".into());

        if api_resp.code.as_deref() == Some("conflict") {
            if let Some(info) = api_resp
                .data
                .and_then(|d| serde_json::from_value::<ConflictInfo>(d).ok())
            {
                anyhow::bail!(
                    "{message} (held by {} on {}, expires {})",
                    info.owner,
                    info.path,
                    info.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        Err(anyhow::anyhow!(message))
    }
}
