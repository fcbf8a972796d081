//! Image reference values.
//!
//! A [`LocalImage`] is what a local container engine knows about: a name and
//! a tag. A [`RemoteImage`] is either hosted on a platform cluster registry
//! (cluster, org, project and registry host attached) or lives on an external
//! registry such as Docker Hub.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::validate::{DEFAULT_TAG, SCHEME};

/// Everything except RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Image names keep their `/` separators.
const PATH: &AsciiSet = &COMPONENT.remove(b'/');

/// Whether an operation accepts an explicit tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagOption {
    /// Tag is optional and defaults to `latest`.
    #[default]
    Allow,
    /// Tag must be absent, e.g. when sharing an image.
    Deny,
}

/// Organization an image belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Org {
    #[default]
    None,
    Named(String),
}

impl Org {
    /// Wire spelling of [`Org::None`].
    pub const NO_ORG: &'static str = "NO_ORG";

    pub fn from_option(org: Option<String>) -> Self {
        match org {
            Some(name) => Org::Named(name),
            None => Org::None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Org::None => None,
            Org::Named(name) => Some(name),
        }
    }

    /// The only place the sentinel string is produced.
    pub fn to_wire(&self) -> &str {
        self.name().unwrap_or(Self::NO_ORG)
    }

    /// The only place the sentinel string is recognised.
    pub fn from_wire(value: &str) -> Self {
        if value == Self::NO_ORG {
            Org::None
        } else {
            Org::Named(value.to_string())
        }
    }
}

impl Serialize for Org {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.to_wire())
    }
}

impl<'de> Deserialize<'de> for Org {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Org::from_wire(&value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LocalImage {
    pub name: String,
    pub tag: String,
}

impl LocalImage {
    pub fn new(name: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
        }
    }
}

impl fmt::Display for LocalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Platform coordinates of a hosted image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformLocation {
    pub cluster_name: String,
    pub org: Org,
    pub project_name: String,
    /// `host[:port]` of the cluster registry.
    pub registry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageOrigin {
    Platform(PlatformLocation),
    External { registry: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteImage {
    name: String,
    tag: Option<String>,
    origin: ImageOrigin,
}

impl RemoteImage {
    pub fn new_platform_image(
        name: impl Into<String>,
        tag: Option<String>,
        cluster_name: impl Into<String>,
        org: Org,
        project_name: impl Into<String>,
        registry: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tag,
            origin: ImageOrigin::Platform(PlatformLocation {
                cluster_name: cluster_name.into(),
                org,
                project_name: project_name.into(),
                registry: registry.into(),
            }),
        }
    }

    pub fn new_external_image(
        name: impl Into<String>,
        tag: Option<String>,
        registry: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tag,
            origin: ImageOrigin::External { registry },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn origin(&self) -> &ImageOrigin {
        &self.origin
    }

    pub fn platform(&self) -> Option<&PlatformLocation> {
        match &self.origin {
            ImageOrigin::Platform(location) => Some(location),
            ImageOrigin::External { .. } => None,
        }
    }

    pub fn is_platform(&self) -> bool {
        self.platform().is_some()
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.platform().map(|p| p.cluster_name.as_str())
    }

    pub fn org(&self) -> Option<&Org> {
        self.platform().map(|p| &p.org)
    }

    pub fn project_name(&self) -> Option<&str> {
        self.platform().map(|p| p.project_name.as_str())
    }

    pub fn registry(&self) -> Option<&str> {
        match &self.origin {
            ImageOrigin::Platform(location) => Some(&location.registry),
            ImageOrigin::External { registry } => registry.as_deref(),
        }
    }

    /// Same image with a different tag.
    pub fn with_tag(&self, tag: Option<String>) -> Self {
        Self {
            tag,
            ..self.clone()
        }
    }

    /// The reference a container engine uses to push to or pull from the
    /// registry.
    pub fn as_docker_url(&self) -> String {
        let mut url = match &self.origin {
            ImageOrigin::Platform(location) => format!(
                "{}/{}/{}",
                location.registry, location.project_name, self.name
            ),
            ImageOrigin::External { .. } => self.name.clone(),
        };
        if let Some(tag) = &self.tag {
            url.push(':');
            url.push_str(tag);
        }
        url
    }
}

impl fmt::Display for RemoteImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            ImageOrigin::Platform(location) => {
                write!(
                    f,
                    "{SCHEME}//{}/",
                    utf8_percent_encode(&location.cluster_name, COMPONENT)
                )?;
                if let Org::Named(org) = &location.org {
                    write!(f, "{}/", utf8_percent_encode(org, COMPONENT))?;
                }
                write!(
                    f,
                    "{}/{}",
                    utf8_percent_encode(&location.project_name, COMPONENT),
                    utf8_percent_encode(&self.name, PATH)
                )?;
                if let Some(tag) = &self.tag {
                    write!(f, ":{}", utf8_percent_encode(tag, COMPONENT))?;
                }
                Ok(())
            }
            ImageOrigin::External { .. } => {
                write!(f, "{}", self.name)?;
                if let Some(tag) = &self.tag {
                    write!(f, ":{tag}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Serialize)]
struct RemoteImageRecord<'a> {
    name: &'a str,
    tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_name: Option<&'a Org>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_name: Option<&'a str>,
    registry: Option<&'a str>,
    uri: String,
}

impl Serialize for RemoteImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RemoteImageRecord {
            name: self.name(),
            tag: self.tag(),
            cluster_name: self.cluster_name(),
            org_name: self.org(),
            project_name: self.project_name(),
            registry: self.registry(),
            uri: self.to_string(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(name: &str, tag: Option<&str>, org: Org) -> RemoteImage {
        RemoteImage::new_platform_image(
            name,
            tag.map(str::to_string),
            "default",
            org,
            "test-project",
            "reg.neu.ro",
        )
    }

    #[test]
    fn test_local_image_display() {
        let image = LocalImage::new("ubuntu", None);
        assert_eq!(image.tag, "latest");
        assert_eq!(image.to_string(), "ubuntu:latest");
        let image = LocalImage::new("localhost:5000/ubuntu", Some("v1".to_string()));
        assert_eq!(image.to_string(), "localhost:5000/ubuntu:v1");
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(
            platform("ubuntu", Some("latest"), Org::None).to_string(),
            "image://default/test-project/ubuntu:latest"
        );
        assert_eq!(
            platform("library/ubuntu", None, Org::Named("acme".to_string())).to_string(),
            "image://default/acme/test-project/library/ubuntu"
        );
    }

    #[test]
    fn test_platform_display_encodes() {
        let image = platform("my image#1", Some("tag?ß"), Org::None);
        assert_eq!(
            image.to_string(),
            "image://default/test-project/my%20image%231:tag%3F%C3%9F"
        );
        let image = platform("a:b", Some("v1"), Org::None);
        assert_eq!(image.to_string(), "image://default/test-project/a%3Ab:v1");
    }

    #[test]
    fn test_external_display() {
        let image = RemoteImage::new_external_image("ubuntu", Some("v1".to_string()), None);
        assert_eq!(image.to_string(), "ubuntu:v1");
        assert_eq!(image.as_docker_url(), "ubuntu:v1");
        let image = RemoteImage::new_external_image(
            "ghcr.io/owner/my image",
            None,
            Some("ghcr.io".to_string()),
        );
        assert_eq!(image.to_string(), "ghcr.io/owner/my image");
        assert_eq!(image.registry(), Some("ghcr.io"));
        assert!(!image.is_platform());
    }

    #[test]
    fn test_as_docker_url() {
        let image = platform("ubuntu", Some("v10.04"), Org::Named("acme".to_string()));
        assert_eq!(image.as_docker_url(), "reg.neu.ro/test-project/ubuntu:v10.04");
        assert_eq!(
            image.with_tag(None).as_docker_url(),
            "reg.neu.ro/test-project/ubuntu"
        );
    }

    #[test]
    fn test_org_wire() {
        assert_eq!(Org::None.to_wire(), "NO_ORG");
        assert_eq!(Org::Named("acme".to_string()).to_wire(), "acme");
        assert_eq!(Org::from_wire("NO_ORG"), Org::None);
        assert_eq!(Org::from_wire("acme"), Org::Named("acme".to_string()));
        assert_eq!(Org::from_option(None), Org::None);
    }

    #[test]
    fn test_serialize_remote_image() {
        let value = serde_json::to_value(platform("ubuntu", Some("v1"), Org::None)).unwrap();
        assert_eq!(value["name"], "ubuntu");
        assert_eq!(value["tag"], "v1");
        assert_eq!(value["cluster_name"], "default");
        assert_eq!(value["org_name"], "NO_ORG");
        assert_eq!(value["project_name"], "test-project");
        assert_eq!(value["registry"], "reg.neu.ro");
        assert_eq!(value["uri"], "image://default/test-project/ubuntu:v1");

        let external = RemoteImage::new_external_image("ubuntu", None, None);
        let value = serde_json::to_value(external).unwrap();
        assert!(value.get("cluster_name").is_none());
        assert!(value["registry"].is_null());
    }

    #[test]
    fn test_org_deserialize() {
        let org: Org = serde_json::from_str("\"NO_ORG\"").unwrap();
        assert_eq!(org, Org::None);
        let org: Org = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(org, Org::Named("acme".to_string()));
    }
}
