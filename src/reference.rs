// Domain grammar follows https://github.com/distribution/distribution/blob/v2.7.1/reference/reference.go

use std::sync::LazyLock;

use regex::Regex;

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?P<domain>[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9](?:\.[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])*)
        (?::(?P<port>[0-9]+))?
        /
        (?P<path>.+)
        $
    ",
    )
    .expect("domain pattern is valid")
});

/// Registry host of an image hosted outside the platform.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ExternalReference {
    domain: Option<String>,
    port: Option<u16>,
}

impl ExternalReference {
    /// Inspects an untagged image name. Names without a recognisable host
    /// are Docker Hub names.
    pub fn parse(name: &str) -> Self {
        let unqualified = || ExternalReference {
            domain: None,
            port: None,
        };
        let Some(captures) = DOMAIN.captures(name) else {
            return unqualified();
        };

        let domain = &captures["domain"];
        let port = match captures.name("port") {
            Some(port) => match port.as_str().parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) => return unqualified(),
            },
            None => None,
        };

        // Same heuristic docker uses: a first component that is not dotted,
        // has no port and is not localhost is a namespace, not a host.
        if !domain.contains('.') && port.is_none() && domain != "localhost" {
            return unqualified();
        }

        ExternalReference {
            domain: Some(domain.to_string()),
            port,
        }
    }

    /// `host[:port]`, if the name carried one.
    pub fn registry(&self) -> Option<String> {
        let domain = self.domain.as_ref()?;
        Some(match self.port {
            Some(port) => format!("{domain}:{port}"),
            None => domain.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_reference() {
        let reference = ExternalReference::parse("my.domain.com:8080/my_image");
        assert_eq!(reference.domain.as_deref(), Some("my.domain.com"));
        assert_eq!(reference.port, Some(8080));
        assert_eq!(reference.registry().as_deref(), Some("my.domain.com:8080"));

        let reference = ExternalReference::parse("my_image");
        assert_eq!(reference.domain.as_deref(), None);
        assert_eq!(reference.port, None);
        assert_eq!(reference.registry(), None);

        let reference = ExternalReference::parse("localhost:5000/my-workload/subworkload");
        assert_eq!(reference.domain.as_deref(), Some("localhost"));
        assert_eq!(reference.port, Some(5000));

        let reference = ExternalReference::parse("localhost/my-workload");
        assert_eq!(reference.registry().as_deref(), Some("localhost"));

        let reference = ExternalReference::parse("ghcr.io/owner/tool");
        assert_eq!(reference.registry().as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn test_namespace_is_not_a_domain() {
        let reference = ExternalReference::parse("library/ubuntu");
        assert_eq!(reference.domain.as_deref(), None);

        let reference = ExternalReference::parse("my-registry-custom-dns/my-workload");
        assert_eq!(reference.domain.as_deref(), None);
    }

    #[test]
    fn test_out_of_range_port() {
        let reference = ExternalReference::parse("host:99999/image");
        assert_eq!(reference.domain.as_deref(), None);
    }
}
