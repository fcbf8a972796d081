use reqwest::{Method, Request};
use serde::Deserialize;
use tracing::warn;
use url::{Host, Url};

use crate::error::RegistryError;
use crate::image::{RemoteImage, TagOption};
use crate::parser::ImageNameParser;

pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Registry login: platform user name plus access token.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    pub fn authorization(&self) -> String {
        let pair = format!("{}:{}", self.username, self.token);
        format!("Basic {}", data_encoding::BASE64.encode(pair.as_bytes()))
    }
}

/// Base URL and auth header of one registry.
#[derive(Clone, Debug)]
pub struct RegistryEndpoint {
    base_url: Url,
    authorization: Option<String>,
}

impl RegistryEndpoint {
    /// `registry` is `host[:port]`; local registries are reached over plain http.
    pub fn new(registry: &str, credentials: Option<&Credentials>) -> Result<Self, RegistryError> {
        let mut base_url = Url::parse(&format!("https://{registry}"))?;
        let local = match base_url.host() {
            Some(Host::Domain(domain)) => domain == "localhost",
            Some(Host::Ipv4(addr)) => addr.is_loopback(),
            Some(Host::Ipv6(addr)) => addr.is_loopback(),
            None => false,
        };
        if local {
            base_url = Url::parse(&format!("http://{registry}"))?;
        }
        Ok(Self {
            base_url,
            authorization: credentials.map(Credentials::authorization),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn request(&self, method: Method, url: Url) -> Result<Request, RegistryError> {
        let mut req = Request::new(method, url);
        if let Some(v) = self.authorization.as_ref() {
            req.headers_mut().insert(
                http::header::AUTHORIZATION,
                http::HeaderValue::from_str(v).map_err(|_| RegistryError::InvalidAuth)?,
            );
        }
        Ok(req)
    }

    pub fn catalog_request(
        &self,
        page_size: usize,
        last: Option<&str>,
    ) -> Result<Request, RegistryError> {
        let mut url = self.base_url.join("/v2/_catalog")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("n", &page_size.to_string());
            if let Some(last) = last {
                query.append_pair("last", last);
            }
        }
        self.request(Method::GET, url)
    }
}

/// One repository of a platform registry.
#[derive(Clone, Debug)]
pub struct RepoInfo {
    pub image: RemoteImage,

    /// `<project>/<name>`
    pub repository: String,

    endpoint: RegistryEndpoint,
}

impl RepoInfo {
    pub fn from_image(
        image: &RemoteImage,
        credentials: Option<&Credentials>,
    ) -> Result<RepoInfo, RegistryError> {
        let location = image
            .platform()
            .ok_or_else(|| RegistryError::NotPlatformImage(image.to_string()))?;
        if image.name().is_empty() {
            return Err(RegistryError::EmptyImageName);
        }

        Ok(Self {
            image: image.clone(),
            repository: format!("{}/{}", location.project_name, image.name()),
            endpoint: RegistryEndpoint::new(&location.registry, credentials)?,
        })
    }

    pub fn endpoint(&self) -> &RegistryEndpoint {
        &self.endpoint
    }

    pub fn tags_list_request(&self) -> Result<Request, RegistryError> {
        let url = self
            .endpoint
            .base_url
            .join(&format!("/v2/{}/tags/list", self.repository))?;
        self.endpoint.request(Method::GET, url)
    }

    /// HEAD request whose `Docker-Content-Digest` header identifies `tag`.
    pub fn manifest_request(&self, tag: &str) -> Result<Request, RegistryError> {
        let url = self
            .endpoint
            .base_url
            .join(&format!("/v2/{}/manifests/{}", self.repository, tag))?;
        let mut req = self.endpoint.request(Method::HEAD, url)?;
        req.headers_mut().insert(
            http::header::ACCEPT,
            http::HeaderValue::from_static(MANIFEST_V2),
        );
        Ok(req)
    }
}

/// Body of `GET /v2/_catalog`.
#[derive(Debug, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl Catalog {
    /// Untagged images of `cluster`. Entries lacking a project are skipped.
    pub fn into_images(
        self,
        parser: &ImageNameParser,
        cluster: &str,
    ) -> Result<Vec<RemoteImage>, RegistryError> {
        let registry = parser.registry_for(cluster)?;
        let org = parser.default_org();
        let mut images = Vec::with_capacity(self.repositories.len());
        for repository in self.repositories {
            match repository.split_once('/') {
                Some((project, name)) if !project.is_empty() && !name.is_empty() => {
                    images.push(RemoteImage::new_platform_image(
                        name,
                        None,
                        cluster,
                        org.clone(),
                        project,
                        registry,
                    ));
                }
                _ => warn!(%repository, "skipping catalog entry without project"),
            }
        }
        Ok(images)
    }
}

/// Body of `GET /v2/<repository>/tags/list`.
#[derive(Debug, Deserialize)]
pub struct TagList {
    pub name: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl TagList {
    /// One image per tag; registries answer `"tags": null` for empty repos.
    pub fn into_images(self, image: &RemoteImage) -> Vec<RemoteImage> {
        self.tags
            .unwrap_or_default()
            .into_iter()
            .map(|tag| image.with_tag(Some(tag)))
            .collect()
    }
}

/// Resolves the `rel="next"` target of a `Link` header against `base`.
pub fn next_page(link: Option<&str>, base: &Url) -> Option<Url> {
    link?.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| matches!(param.trim(), "rel=\"next\"" | "rel=next"));
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        base.join(target).ok()
    })
}

/// Parses a reference to a whole repository; explicit tags are rejected.
pub fn repository_image(
    parser: &ImageNameParser,
    image: &str,
) -> Result<RemoteImage, RegistryError> {
    Ok(parser.parse_as_remote_image(image, TagOption::Deny)?)
}
