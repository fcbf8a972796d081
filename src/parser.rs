//! Resolution of user supplied image strings.
//!
//! Remote references come in three shapes, tried in order:
//!
//! 1. platform URIs: `image://[cluster]/[org/]project/name[:tag]`,
//!    `image:/project/name[:tag]` and `image:name[:tag]`;
//! 2. references prefixed with a configured registry host, e.g.
//!    `registry.example.com/project/name[:tag]`;
//! 3. anything else, which is only accepted as a local or external image.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{ImageError, ParseError, Result};
use crate::image::{LocalImage, Org, RemoteImage, TagOption};
use crate::reference::ExternalReference;
use crate::validate::{
    check_dot_segments, decode_component, has_tag, is_dot_segment, registry_authority,
    split_name_and_tag, split_tag, validate_image_string, validate_tag, DEFAULT_TAG, SCHEME,
};

/// Namespacing levels between the cluster and the image name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Hierarchy {
    /// `cluster/[org/]project/name`
    #[default]
    #[serde(rename = "three-level")]
    ClusterOrgProject,
    /// `cluster/project/name`, orgs are never parsed nor rendered.
    #[serde(rename = "two-level")]
    ClusterProject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ParserOptions {
    #[serde(default)]
    pub hierarchy: Hierarchy,
    /// Percent-decode local names and tags instead of taking them verbatim.
    #[serde(default)]
    pub decode_local_names: bool,
}

/// Defaults used to complete partial references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionContext {
    pub default_cluster: String,
    pub default_org: Option<String>,
    pub default_project: String,
    /// Cluster name to registry base URL.
    pub registry_urls: BTreeMap<String, String>,
}

#[derive(Debug)]
enum Location {
    /// `image:name`, resolved against the default org and project.
    Relative(Vec<String>),
    /// Segments following the cluster.
    Absolute(Vec<String>),
}

#[derive(Debug)]
struct ImagePath {
    cluster: Option<String>,
    location: Location,
    tag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageNameParser {
    context: ResolutionContext,
    options: ParserOptions,
    /// Cluster name to registry `host[:port]`.
    registries: BTreeMap<String, String>,
}

impl ImageNameParser {
    /// Fails if any registry URL has no host.
    pub fn new(context: ResolutionContext, options: ParserOptions) -> Result<Self> {
        let registries = context
            .registry_urls
            .iter()
            .map(|(cluster, url)| -> Result<(String, String)> {
                Ok((cluster.clone(), registry_authority(url)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            context,
            options,
            registries,
        })
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Registry `host[:port]` serving `cluster`.
    pub fn registry_for(&self, cluster: &str) -> Result<&str> {
        self.registries
            .get(cluster)
            .map(String::as_str)
            .ok_or_else(|| ImageError::UnknownCluster {
                cluster: cluster.to_string(),
                available: self.registries.keys().cloned().collect(),
            })
    }

    /// Whether `image` names something in a platform registry, either by
    /// scheme or by registry host prefix.
    pub fn is_in_platform_registry(&self, image: &str) -> bool {
        image.starts_with(SCHEME) || self.strip_registry(image).is_some()
    }

    pub fn parse_as_local_image(&self, image: &str) -> Result<LocalImage> {
        self.parse_local(image)
            .map_err(|source| ImageError::InvalidLocal {
                image: image.to_string(),
                source,
            })
    }

    /// Parses a reference to an image in a platform registry.
    pub fn parse_as_remote_image(
        &self,
        image: &str,
        tag_option: TagOption,
    ) -> Result<RemoteImage> {
        let invalid = |source| ImageError::InvalidRemote {
            image: image.to_string(),
            source,
        };

        validate_image_string(image).map_err(invalid)?;
        if tag_option == TagOption::Deny && has_tag(image).map_err(invalid)? {
            return Err(invalid(ParseError::TagNotAllowed));
        }

        let path = if image.starts_with(SCHEME) {
            parse_image_uri(image).map_err(invalid)?
        } else if let Some((cluster, rest)) = self.strip_registry(image) {
            debug!(image, cluster, "matched registry prefix");
            let (segments, tag) = split_path(rest, false).map_err(invalid)?;
            ImagePath {
                cluster: Some(cluster.to_string()),
                location: Location::Absolute(segments),
                tag,
            }
        } else {
            return Err(invalid(ParseError::SchemeRequired));
        };

        self.assemble(image, path, tag_option)
    }

    /// Parses either a platform reference or an external one such as a Docker
    /// Hub name.
    pub fn parse_remote(&self, image: &str, tag_option: TagOption) -> Result<RemoteImage> {
        if self.is_in_platform_registry(image) {
            return self.parse_as_remote_image(image, tag_option);
        }

        let invalid = |source| ImageError::InvalidRemote {
            image: image.to_string(),
            source,
        };
        if tag_option == TagOption::Deny && has_tag(image).map_err(invalid)? {
            return Err(invalid(ParseError::TagNotAllowed));
        }
        let local = self.parse_local(image).map_err(invalid)?;
        let registry = ExternalReference::parse(&local.name).registry();
        let tag = match tag_option {
            TagOption::Allow => Some(local.tag),
            TagOption::Deny => None,
        };
        debug!(image, ?registry, "parsed external image");
        Ok(RemoteImage::new_external_image(local.name, tag, registry))
    }

    pub fn convert_to_local_image(&self, image: &RemoteImage) -> LocalImage {
        LocalImage::new(image.name(), image.tag().map(str::to_string))
    }

    /// Places a local image in the platform registry.
    ///
    /// Names that already start with a configured registry host keep the
    /// project they spell out; everything else lands in the default cluster
    /// and project unchanged.
    pub fn convert_to_remote_image(&self, image: &LocalImage) -> Result<RemoteImage> {
        if image.name.split('/').any(is_dot_segment) {
            return Err(ImageError::InvalidLocal {
                image: image.to_string(),
                source: ParseError::DotSegment,
            });
        }
        let tag = Some(image.tag.clone());

        if let Some((cluster, rest)) = self.strip_registry(&image.name) {
            // `registry/` alone stays a literal name below.
            if !rest.is_empty() {
                let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
                let (org, project, name) = if segments.len() == 1 {
                    (
                        self.default_org(),
                        self.context.default_project.clone(),
                        rest.to_string(),
                    )
                } else {
                    self.resolve_absolute(segments)
                        .map_err(|source| ImageError::InvalidLocal {
                            image: image.to_string(),
                            source,
                        })?
                };
                let registry = self.registry_for(cluster)?;
                return Ok(RemoteImage::new_platform_image(
                    name, tag, cluster, org, project, registry,
                ));
            }
        }

        let cluster = &self.context.default_cluster;
        let registry = self.registry_for(cluster)?;
        Ok(RemoteImage::new_platform_image(
            image.name.clone(),
            tag,
            cluster.clone(),
            self.default_org(),
            self.context.default_project.clone(),
            registry,
        ))
    }

    fn parse_local(&self, image: &str) -> std::result::Result<LocalImage, ParseError> {
        validate_image_string(image)?;
        if image.starts_with(SCHEME) {
            return Err(ParseError::SchemeNotAllowed);
        }
        let (name, tag) = split_name_and_tag(image, DEFAULT_TAG)?;
        if !self.options.decode_local_names {
            return Ok(LocalImage { name, tag });
        }

        let name = decode_component(&name, "name")?.into_owned();
        let tag = decode_component(&tag, "tag")?.into_owned();
        validate_tag(&tag)?;
        Ok(LocalImage { name, tag })
    }

    fn assemble(
        &self,
        image: &str,
        path: ImagePath,
        tag_option: TagOption,
    ) -> Result<RemoteImage> {
        let invalid = |source| ImageError::InvalidRemote {
            image: image.to_string(),
            source,
        };

        let (org, project, name) = match path.location {
            Location::Relative(segments) => (
                self.default_org(),
                self.context.default_project.clone(),
                join_name(&segments).map_err(invalid)?,
            ),
            Location::Absolute(segments) => self.resolve_absolute(segments).map_err(invalid)?,
        };

        let tag = match (tag_option, path.tag) {
            (TagOption::Allow, tag) => Some(tag.unwrap_or_else(|| DEFAULT_TAG.to_string())),
            (TagOption::Deny, None) => None,
            (TagOption::Deny, Some(_)) => return Err(invalid(ParseError::TagNotAllowed)),
        };

        let cluster = path
            .cluster
            .unwrap_or_else(|| self.context.default_cluster.clone());
        let registry = self.registry_for(&cluster)?;
        debug!(image, %cluster, project = %project, name = %name, "resolved platform image");
        Ok(RemoteImage::new_platform_image(
            name, tag, cluster, org, project, registry,
        ))
    }

    /// Splits the segments after the cluster into org, project and name.
    ///
    /// The first segment is only taken as the org when it equals the default
    /// org and at least a project and a name follow it. Any other leading
    /// segment is the project, even if it happens to be some org's name.
    fn resolve_absolute(
        &self,
        segments: Vec<String>,
    ) -> std::result::Result<(Org, String, String), ParseError> {
        if segments.iter().all(String::is_empty) {
            return Err(ParseError::NoImageName);
        }

        let org = match (self.options.hierarchy, &self.context.default_org) {
            (Hierarchy::ClusterOrgProject, Some(org))
                if segments.len() >= 3 && segments[0] == *org =>
            {
                Org::Named(org.clone())
            }
            _ => Org::None,
        };
        let rest = match org {
            Org::Named(_) => &segments[1..],
            Org::None => &segments[..],
        };

        let (project, name) = rest.split_first().ok_or(ParseError::NoImageName)?;
        if project.is_empty() {
            return Err(ParseError::EmptyComponent("project"));
        }
        Ok((org, project.clone(), join_name(name)?))
    }

    /// Org attached to images that do not spell one out.
    pub fn default_org(&self) -> Org {
        match self.options.hierarchy {
            Hierarchy::ClusterOrgProject => Org::from_option(self.context.default_org.clone()),
            Hierarchy::ClusterProject => Org::None,
        }
    }

    /// Finds the cluster whose registry host prefixes `image`. Ports have to
    /// match exactly. The default cluster wins when registries are shared.
    fn strip_registry<'a>(&'a self, image: &'a str) -> Option<(&'a str, &'a str)> {
        let default = self.context.default_cluster.as_str();
        let candidates = self
            .registries
            .get_key_value(default)
            .into_iter()
            .chain(self.registries.iter().filter(|(cluster, _)| *cluster != default));
        for (cluster, authority) in candidates {
            if let Some(rest) = image
                .strip_prefix(authority.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                return Some((cluster.as_str(), rest));
            }
        }
        None
    }
}

fn parse_image_uri(image: &str) -> std::result::Result<ImagePath, ParseError> {
    check_dot_segments(image.strip_prefix(SCHEME).unwrap_or(image))?;
    let uri = Url::parse(image).map_err(|err| match err {
        url::ParseError::InvalidPort => ParseError::InvalidPort,
        other => ParseError::MalformedUri(other),
    })?;

    check_user_info(image, &uri)?;
    if uri.port().is_some() {
        return Err(ParseError::PortNotAllowed);
    }
    if uri.query().is_some() {
        return Err(ParseError::QueryNotAllowed);
    }
    if uri.fragment().is_some() {
        return Err(ParseError::FragmentNotAllowed);
    }

    let cluster = uri
        .host_str()
        .filter(|host| !host.is_empty())
        .map(|host| decode_component(host, "cluster").map(Cow::into_owned))
        .transpose()?;

    let path = uri.path();
    let (location, tag) = match path.strip_prefix('/') {
        Some(absolute) => {
            let (segments, tag) = split_path(absolute, true)?;
            (Location::Absolute(segments), tag)
        }
        None if cluster.is_some() => {
            let (segments, tag) = split_path(path, true)?;
            (Location::Absolute(segments), tag)
        }
        None => {
            let (segments, tag) = split_path(path, true)?;
            (Location::Relative(segments), tag)
        }
    };
    Ok(ImagePath {
        cluster,
        location,
        tag,
    })
}

/// The URL parser folds `:@` and `@` into "no user info", so the raw
/// authority is checked as well.
fn check_user_info(image: &str, uri: &Url) -> std::result::Result<(), ParseError> {
    if !uri.username().is_empty() {
        return Err(ParseError::UserNotAllowed);
    }
    match uri.password() {
        Some("") => return Err(ParseError::EmptyPasswordNotAllowed),
        Some(_) => return Err(ParseError::PasswordNotAllowed),
        None => {}
    }

    let authority = image
        .strip_prefix("image://")
        .and_then(|rest| rest.split(|c: char| matches!(c, '/' | '?' | '#')).next());
    if let Some((user_info, _)) = authority.and_then(|authority| authority.rsplit_once('@')) {
        return Err(if user_info.contains(':') {
            ParseError::EmptyPasswordNotAllowed
        } else {
            ParseError::UserNotAllowed
        });
    }
    Ok(())
}

/// Separates the tag from a `/` delimited path and splits the rest into
/// segments.
fn split_path(
    path: &str,
    decode: bool,
) -> std::result::Result<(Vec<String>, Option<String>), ParseError> {
    let decoded = |raw: &str, what: &'static str| -> std::result::Result<String, ParseError> {
        if decode {
            Ok(decode_component(raw, what)?.into_owned())
        } else {
            Ok(raw.to_string())
        }
    };

    let (name, tag) = split_tag(path)?;
    let tag = tag.map(|tag| decoded(tag, "tag")).transpose()?;
    if let Some(tag) = &tag {
        validate_tag(tag)?;
    }
    let segments = name
        .split('/')
        .map(|segment| decoded(segment, "name"))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if segments.iter().any(|segment| is_dot_segment(segment)) {
        return Err(ParseError::DotSegment);
    }
    Ok((segments, tag))
}

fn join_name(segments: &[String]) -> std::result::Result<String, ParseError> {
    match segments.last() {
        None => return Err(ParseError::NoImageName),
        Some(last) if last.is_empty() => return Err(ParseError::NoImageName),
        Some(_) => {}
    }
    if segments.iter().any(String::is_empty) {
        return Err(ParseError::EmptyName);
    }
    let name = segments.join("/");
    if name.starts_with('-') {
        return Err(ParseError::StartsWithDash);
    }
    Ok(name)
}
