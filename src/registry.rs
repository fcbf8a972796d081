//! Async client for the cluster registry API.

use std::collections::HashSet;

use reqwest::{Client, Request, Response};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::image::RemoteImage;
use crate::parser::ImageNameParser;
use crate::repo_info::{next_page, Catalog, Credentials, RegistryEndpoint, RepoInfo, TagList};

const CATALOG_PAGE_SIZE: usize = 1000;
const DIGEST_HEADER: &str = "Docker-Content-Digest";

pub struct RegistryClient {
    client: Client,
    parser: ImageNameParser,
    credentials: Option<Credentials>,
}

impl RegistryClient {
    pub fn new(parser: ImageNameParser, credentials: Option<Credentials>) -> Self {
        Self::with_client(Client::new(), parser, credentials)
    }

    pub fn with_client(
        client: Client,
        parser: ImageNameParser,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            client,
            parser,
            credentials,
        }
    }

    pub fn parser(&self) -> &ImageNameParser {
        &self.parser
    }

    /// All repositories of the default cluster, following catalog pages.
    pub async fn ls(&self) -> Result<Vec<RemoteImage>, RegistryError> {
        let cluster = self.parser.context().default_cluster.as_str();
        let registry = self.parser.registry_for(cluster)?;
        let endpoint = RegistryEndpoint::new(registry, self.credentials.as_ref())?;
        info!(%cluster, %registry, "listing repositories");

        let mut images = Vec::new();
        let mut seen = HashSet::new();
        let mut req = endpoint.catalog_request(CATALOG_PAGE_SIZE, None)?;
        loop {
            seen.insert(req.url().clone());
            let resp = self.send(req).await?;
            let next = next_page(
                resp.headers()
                    .get(http::header::LINK)
                    .and_then(|v| v.to_str().ok()),
                endpoint.base_url(),
            );
            let catalog: Catalog = serde_json::from_slice(&resp.bytes().await?)?;
            images.extend(catalog.into_images(&self.parser, cluster)?);

            match next {
                Some(url) if seen.contains(&url) => {
                    warn!(%url, "catalog pages loop, stopping");
                    break;
                }
                Some(url) => {
                    debug!(%url, "fetching next catalog page");
                    req = endpoint.request(reqwest::Method::GET, url)?;
                }
                None => break,
            }
        }
        Ok(images)
    }

    /// Every tagged image of the repository `image` points at.
    pub async fn tags(&self, image: &RemoteImage) -> Result<Vec<RemoteImage>, RegistryError> {
        let repo = RepoInfo::from_image(image, self.credentials.as_ref())?;
        info!(repository = %repo.repository, "listing tags");
        let resp = self.send(repo.tags_list_request()?).await?;
        let list: TagList = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(list.into_images(&repo.image.with_tag(None)))
    }

    /// Content digest of a tagged image; untagged images resolve `latest`.
    pub async fn digest(&self, image: &RemoteImage) -> Result<String, RegistryError> {
        let repo = RepoInfo::from_image(image, self.credentials.as_ref())?;
        let tag = image.tag().unwrap_or(crate::validate::DEFAULT_TAG);
        let resp = self.send(repo.manifest_request(tag)?).await?;
        resp.headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RegistryError::MissingDigest(image.to_string()))
    }

    async fn send(&self, req: Request) -> Result<Response, RegistryError> {
        let url = req.url().to_string();
        let resp = self.client.execute(req).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RegistryError::Status { status, url });
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::image::TagOption;
    use crate::parser::{ParserOptions, ResolutionContext};

    /// Answers one connection per canned response and records request lines.
    async fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                requests.push(head.lines().next().unwrap_or_default().to_string());
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    fn client(registry_url: &str) -> RegistryClient {
        let parser = ImageNameParser::new(
            ResolutionContext {
                default_cluster: "default".to_string(),
                default_org: None,
                default_project: "test-project".to_string(),
                registry_urls: BTreeMap::from([(
                    "default".to_string(),
                    registry_url.to_string(),
                )]),
            },
            ParserOptions::default(),
        )
        .unwrap();
        let http = Client::builder().no_proxy().build().unwrap();
        RegistryClient::with_client(http, parser, None)
    }

    #[tokio::test]
    async fn test_ls_follows_pages() {
        let (url, server) = serve(vec![
            response(
                "200 OK",
                &[("Link", "</v2/_catalog?last=project%2Fa&n=1000>; rel=\"next\"")],
                r#"{"repositories": ["project/a"]}"#,
            ),
            response("200 OK", &[], r#"{"repositories": ["project/b/c"]}"#),
        ])
        .await;
        let client = client(&url);

        let images = client.ls().await.unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b/c"]);
        assert!(images.iter().all(|i| i.tag().is_none()));

        let requests = server.await.unwrap();
        assert_eq!(requests[0], "GET /v2/_catalog?n=1000 HTTP/1.1");
        assert_eq!(
            requests[1],
            "GET /v2/_catalog?last=project%2Fa&n=1000 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_ls_stops_on_repeated_page() {
        let (url, server) = serve(vec![
            response(
                "200 OK",
                &[("Link", "</v2/_catalog?n=1000&last=project%2Fa>; rel=\"next\"")],
                r#"{"repositories": ["project/a"]}"#,
            ),
            response(
                "200 OK",
                &[("Link", "</v2/_catalog?n=1000>; rel=\"next\"")],
                r#"{"repositories": ["project/b"]}"#,
            ),
        ])
        .await;
        let client = client(&url);

        let images = client.ls().await.unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_tags() {
        let (url, server) = serve(vec![response(
            "200 OK",
            &[],
            r#"{"name": "project/ubuntu", "tags": ["v1", "v2"]}"#,
        )])
        .await;
        let client = client(&url);
        let image = client
            .parser()
            .parse_as_remote_image("image://default/project/ubuntu", TagOption::Deny)
            .unwrap();

        let tagged = client.tags(&image).await.unwrap();
        assert_eq!(
            tagged.iter().map(|i| i.tag().unwrap()).collect::<Vec<_>>(),
            vec!["v1", "v2"]
        );
        let requests = server.await.unwrap();
        assert_eq!(requests[0], "GET /v2/project/ubuntu/tags/list HTTP/1.1");
    }

    #[tokio::test]
    async fn test_digest() {
        let (url, server) = serve(vec![response(
            "200 OK",
            &[("Docker-Content-Digest", "sha256:abcd")],
            "",
        )])
        .await;
        let client = client(&url);
        let image = client
            .parser()
            .parse_as_remote_image("image://default/project/ubuntu:v1", TagOption::Allow)
            .unwrap();

        assert_eq!(client.digest(&image).await.unwrap(), "sha256:abcd");
        let requests = server.await.unwrap();
        assert_eq!(requests[0], "HEAD /v2/project/ubuntu/manifests/v1 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_error_status() {
        let (url, _server) = serve(vec![response("404 Not Found", &[], "{}")]).await;
        let client = client(&url);
        let image = client
            .parser()
            .parse_as_remote_image("image://default/project/missing", TagOption::Deny)
            .unwrap();

        let err = client.tags(&image).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Status { status, .. } if status == reqwest::StatusCode::NOT_FOUND
        ));
    }
}
