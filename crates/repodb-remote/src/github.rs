//! HTTP client for a repository hosted on GitHub (or a compatible API).
//!
//! Content operations go through `/repos/{owner}/{repo}/contents/{path}`;
//! batch commits go through the `git/refs`, `git/commits` and `git/trees`
//! endpoints. Blob content travels base64-encoded.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use repodb_types::{EntryKind, FileChange, ListEntry, VersionToken};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, IF_NONE_MATCH, RETRY_AFTER,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{RemoteError, RemoteResult, STATUS_CONFLICT, STATUS_RATE_LIMITED};
use crate::traits::RemoteStore;
use crate::types::{CreatedTree, Fetched, RemoteBlob, TreeEntry};

const API_VERSION: &str = "2022-11-28";
const FILE_MODE: &str = "100644";

/// Connection settings for [`GitHubClient`].
#[derive(Clone, Debug)]
pub struct GitHubConfig {
    /// API root, e.g. `https://api.github.com`.
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    /// Branch all reads and writes target.
    pub branch: String,
    /// Bearer token; anonymous access when `None`.
    pub token: Option<String>,
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl GitHubConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            api_url: "https://api.github.com".into(),
            owner: owner.into(),
            repo: repo.into(),
            branch: "main".into(),
            token: None,
            user_agent: concat!("repodb/", env!("CARGO_PKG_VERSION")).into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Deserialize)]
struct ContentFile {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct DirEntry {
    name: String,
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Deserialize)]
struct PutResponse {
    content: Sha,
}

#[derive(Deserialize)]
struct RefResponse {
    object: Sha,
}

#[derive(Deserialize)]
struct CommitResponse {
    tree: Sha,
}

#[derive(Deserialize)]
struct BlobResponse {
    content: String,
}

/// [`RemoteStore`] backed by the GitHub REST API.
pub struct GitHubClient {
    http: Client,
    base: Url,
    config: GitHubConfig,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.config.api_url)
            .field("repo", &format!("{}/{}", self.config.owner, self.config.repo))
            .field("branch", &self.config.branch)
            .finish()
    }
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> RemoteResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RemoteError::InvalidRequest(format!("bad token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let base = Url::parse(&config.api_url)
            .map_err(|e| RemoteError::InvalidRequest(format!("bad api url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidRequest(format!(
                "api url cannot be a base: {}",
                config.api_url
            )));
        }

        Ok(Self { http, base, config })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    /// `{api}/repos/{owner}/{repo}/{segments...}` with every path component
    /// percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["repos", self.config.owner.as_str(), self.config.repo.as_str()])
                .extend(
                    segments
                        .iter()
                        .flat_map(|s| s.split('/'))
                        .filter(|s| !s.is_empty()),
                );
        }
        url
    }

    fn contents_url(&self, path: &str) -> Url {
        let mut url = self.url(&["contents", path]);
        url.query_pairs_mut().append_pair("ref", &self.config.branch);
        url
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        debug!(url = %response.url(), status = response.status().as_u16(), "remote response");
        Ok(response)
    }

    async fn fetch_blob(&self, sha: &str) -> RemoteResult<Bytes> {
        let response = self.send(self.http.get(self.url(&["git", "blobs", sha]))).await?;
        let blob: BlobResponse = expect_json(response).await?;
        decode_base64(&blob.content)
    }

    async fn create_blob(&self, content: &[u8]) -> RemoteResult<String> {
        let body = json!({ "content": STANDARD.encode(content), "encoding": "base64" });
        let response = self
            .send(self.http.post(self.url(&["git", "blobs"])).json(&body))
            .await?;
        let blob: Sha = expect_json(response).await?;
        Ok(blob.sha)
    }
}

/// Turn a non-success response into a [`RemoteError::Status`].
///
/// A 403 that reports an exhausted primary rate limit is reported as 429 so
/// callers see a single rate-limit status.
async fn into_error(response: Response) -> RemoteError {
    let mut status = response.status().as_u16();
    let headers = response.headers();
    let mut retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    if status == 403 && exhausted {
        status = STATUS_RATE_LIMITED;
        if retry_after.is_none() {
            retry_after = headers
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(seconds_until);
        }
    }

    let message = match response.text().await {
        Ok(body) => serde_json::from_str::<ApiMessage>(&body)
            .map(|m| m.message)
            .unwrap_or(body),
        Err(e) => e.to_string(),
    };
    RemoteError::Status {
        status,
        message,
        retry_after,
    }
}

fn seconds_until(epoch_secs: u64) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Duration::from_secs(epoch_secs.saturating_sub(now))
}

async fn expect_json<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    if !response.status().is_success() {
        return Err(into_error(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

fn decode_base64(encoded: &str) -> RemoteResult<Bytes> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map(Bytes::from)
        .map_err(|e| RemoteError::Decode(format!("bad base64 content: {e}")))
}

fn version(sha: String) -> RemoteResult<VersionToken> {
    VersionToken::new(sha).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn entry_kind(kind: &str) -> EntryKind {
    match kind {
        "file" => EntryKind::File,
        "dir" => EntryKind::Dir,
        _ => EntryKind::Other,
    }
}

#[async_trait]
impl RemoteStore for GitHubClient {
    fn branch(&self) -> &str {
        &self.config.branch
    }

    async fn get_content(
        &self,
        path: &str,
        if_none_match: Option<&VersionToken>,
    ) -> RemoteResult<Fetched> {
        let mut request = self.http.get(self.contents_url(path));
        if let Some(token) = if_none_match {
            request = request.header(IF_NONE_MATCH, format!("\"{token}\""));
        }
        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => return Ok(Fetched::NotModified),
            StatusCode::NOT_FOUND => return Ok(Fetched::Missing),
            _ => {}
        }

        let file: ContentFile = expect_json(response).await?;
        let content = if file.encoding == "none" {
            // Files over the inline size limit come back without content.
            self.fetch_blob(&file.sha).await?
        } else {
            decode_base64(&file.content)?
        };
        Ok(Fetched::Content(RemoteBlob {
            content,
            version: version(file.sha)?,
        }))
    }

    async fn put_content(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> RemoteResult<VersionToken> {
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(&content),
            "branch": self.config.branch,
        });
        if let Some(sha) = expected {
            body["sha"] = Value::String(sha.to_string());
        }
        let response = self
            .send(self.http.put(self.contents_url(path)).json(&body))
            .await?;
        let put: PutResponse = expect_json(response).await?;
        version(put.content.sha)
    }

    async fn delete_content(
        &self,
        path: &str,
        expected: &VersionToken,
        message: &str,
    ) -> RemoteResult<()> {
        let body = json!({
            "message": message,
            "sha": expected.as_str(),
            "branch": self.config.branch,
        });
        let response = self
            .send(self.http.delete(self.contents_url(path)).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(into_error(response).await);
        }
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> RemoteResult<Option<Vec<ListEntry>>> {
        let response = self.send(self.http.get(self.contents_url(path))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let listing: Vec<DirEntry> = expect_json(response).await?;
        listing
            .into_iter()
            .map(|e| {
                Ok(ListEntry {
                    kind: entry_kind(&e.kind),
                    version: version(e.sha)?,
                    path: e.path,
                    name: e.name,
                })
            })
            .collect::<RemoteResult<Vec<_>>>()
            .map(Some)
    }

    async fn get_ref(&self) -> RemoteResult<String> {
        let url = self.url(&["git", "ref", "heads", self.config.branch.as_str()]);
        let response = self.send(self.http.get(url)).await?;
        let reference: RefResponse = expect_json(response).await?;
        Ok(reference.object.sha)
    }

    async fn get_commit_tree(&self, commit: &str) -> RemoteResult<String> {
        let response = self
            .send(self.http.get(self.url(&["git", "commits", commit])))
            .await?;
        let commit: CommitResponse = expect_json(response).await?;
        Ok(commit.tree.sha)
    }

    async fn create_tree(
        &self,
        base_tree: &str,
        changes: &[FileChange],
    ) -> RemoteResult<CreatedTree> {
        // The tree response only lists top-level entries, so every blob is
        // created up front and its sha becomes the path's version.
        let mut items = Vec::with_capacity(changes.len());
        let mut entries = Vec::new();
        for change in changes {
            let sha = match &change.content {
                Some(content) => {
                    let sha = self.create_blob(content).await?;
                    entries.push(TreeEntry {
                        path: change.path.clone(),
                        version: version(sha.clone())?,
                    });
                    Value::String(sha)
                }
                None => Value::Null,
            };
            items.push(json!({
                "path": change.path.trim_matches('/'),
                "mode": FILE_MODE,
                "type": "blob",
                "sha": sha,
            }));
        }

        let body = json!({ "base_tree": base_tree, "tree": items });
        let response = self
            .send(self.http.post(self.url(&["git", "trees"])).json(&body))
            .await?;
        let tree: Sha = expect_json(response).await?;
        Ok(CreatedTree {
            sha: tree.sha,
            entries,
        })
    }

    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> RemoteResult<String> {
        let body = json!({ "message": message, "tree": tree, "parents": [parent] });
        let response = self
            .send(self.http.post(self.url(&["git", "commits"])).json(&body))
            .await?;
        let commit: Sha = expect_json(response).await?;
        Ok(commit.sha)
    }

    async fn update_ref(&self, commit: &str) -> RemoteResult<()> {
        let url = self.url(&["git", "refs", "heads", self.config.branch.as_str()]);
        let body = json!({ "sha": commit, "force": false });
        let response = self.send(self.http.patch(url).json(&body)).await?;
        if response.status().is_success() {
            return Ok(());
        }
        // A rejected fast-forward is reported as 422; it means the branch moved.
        let err = into_error(response).await;
        match err {
            RemoteError::Status {
                status: 422,
                message,
                retry_after,
            } => Err(RemoteError::Status {
                status: STATUS_CONFLICT,
                message,
                retry_after,
            }),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> GitHubClient {
        let mut config = GitHubConfig::new("octo", "db");
        config.api_url = server.uri();
        config.token = Some("secret-token".into());
        GitHubClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn get_content_decodes_base64() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/db/contents/data/users.json"))
            .and(query_param("ref", "main"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "file",
                "sha": "abc123",
                "encoding": "base64",
                "content": "W3siaWQi\nOiIxIn1d\n",
            })))
            .mount(&server)
            .await;

        let fetched = client(&server).await.get_content("data/users.json", None).await.unwrap();
        match fetched {
            Fetched::Content(blob) => {
                assert_eq!(blob.content, Bytes::from_static(br#"[{"id":"1"}]"#));
                assert_eq!(blob.version.as_str(), "abc123");
            }
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conditional_get_maps_304() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/db/contents/a.json"))
            .and(header("if-none-match", "\"abc123\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let token = VersionToken::new("abc123").unwrap();
        let fetched = client(&server)
            .await
            .get_content("a.json", Some(&token))
            .await
            .unwrap();
        assert_eq!(fetched, Fetched::NotModified);
    }

    #[tokio::test]
    async fn missing_file_and_dir_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let c = client(&server).await;
        assert_eq!(c.get_content("nope.json", None).await.unwrap(), Fetched::Missing);
        assert!(c.list_dir("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "3")
                    .set_body_json(json!({"message": "slow down"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).await.get_content("a.json", None).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(err.to_string().contains("slow down"));
    }

    #[tokio::test]
    async fn exhausted_quota_403_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("retry-after", "60"),
            )
            .mount(&server)
            .await;

        let err = client(&server).await.get_ref().await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn plain_403_stays_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Forbidden"})))
            .mount(&server)
            .await;

        let err = client(&server).await.get_ref().await.unwrap_err();
        assert_eq!(err.status_code(), Some(403));
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn put_sends_expected_sha() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/db/contents/a.json"))
            .and(body_partial_json(json!({
                "sha": "old",
                "branch": "main",
                "content": "e30=",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": {"sha": "new", "path": "a.json"},
                "commit": {"sha": "c1"},
            })))
            .mount(&server)
            .await;

        let old = VersionToken::new("old").unwrap();
        let v = client(&server)
            .await
            .put_content("a.json", Bytes::from_static(b"{}"), Some(&old), "update a")
            .await
            .unwrap();
        assert_eq!(v.as_str(), "new");
    }

    #[tokio::test]
    async fn put_conflict_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({"message": "a.json does not match old"})),
            )
            .mount(&server)
            .await;

        let old = VersionToken::new("old").unwrap();
        let err = client(&server)
            .await
            .put_content("a.json", Bytes::from_static(b"{}"), Some(&old), "update a")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn list_dir_maps_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/db/contents/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "users.json", "path": "data/users.json", "sha": "s1", "type": "file"},
                {"name": "orders", "path": "data/orders", "sha": "s2", "type": "dir"},
            ])))
            .mount(&server)
            .await;

        let entries = client(&server).await.list_dir("data").await.unwrap().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[1].path, "data/orders");
    }

    #[tokio::test]
    async fn create_tree_reports_nested_blob_versions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/db/git/blobs"))
            .and(body_partial_json(json!({"content": "e30=", "encoding": "base64"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sha": "blob-a"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/db/git/blobs"))
            .and(body_partial_json(json!({"content": "W10=", "encoding": "base64"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sha": "blob-list"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/db/git/trees"))
            .and(body_partial_json(json!({
                "base_tree": "base",
                "tree": [
                    {"path": "data/users/a.json", "mode": "100644", "type": "blob", "sha": "blob-a"},
                    {"path": "data/orders.json", "mode": "100644", "type": "blob", "sha": "blob-list"},
                    {"path": "data/users/b.json", "mode": "100644", "type": "blob", "sha": null},
                ],
            })))
            // Only top-level entries come back, as the real API does.
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sha": "t2",
                "tree": [{"path": "data", "sha": "d2", "type": "tree", "mode": "040000"}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tree = client(&server)
            .await
            .create_tree(
                "base",
                &[
                    FileChange::put("data/users/a.json", "{}"),
                    FileChange::put("data/orders.json", "[]"),
                    FileChange::delete("data/users/b.json"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(tree.sha, "t2");
        assert_eq!(tree.version_of("data/users/a.json").unwrap().as_str(), "blob-a");
        assert_eq!(tree.version_of("data/orders.json").unwrap().as_str(), "blob-list");
        assert!(tree.version_of("data/users/b.json").is_none());
    }

    #[tokio::test]
    async fn rejected_fast_forward_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/repos/octo/db/git/refs/heads/main"))
            .and(body_partial_json(json!({"sha": "c2", "force": false})))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({"message": "Update is not a fast forward"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).await.update_ref("c2").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn object_reads_resolve_shas() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/db/git/ref/heads/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ref": "refs/heads/main",
                "object": {"sha": "c1", "type": "commit"},
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/db/git/commits/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "c1",
                "tree": {"sha": "t1"},
            })))
            .mount(&server)
            .await;

        let c = client(&server).await;
        let head = c.get_ref().await.unwrap();
        assert_eq!(head, "c1");
        assert_eq!(c.get_commit_tree(&head).await.unwrap(), "t1");
    }
}
