use crate::error::{DriverError, Result};

const DEFAULT_HTTP_PORT: u16 = 8123;

/// One HTTP endpoint of a ClickHouse deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub healthy: bool,
}

/// The set of links behind one adapter and the link operations go to.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    links: Vec<Link>,
    active: Option<usize>,
}

impl Cluster {
    /// Builds a cluster from a comma-separated host list. Links start out
    /// unhealthy until the first health check.
    pub fn from_address(address: &str) -> Result<Self> {
        let links = address
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| Link {
                url: link_url(host),
                healthy: false,
            })
            .collect::<Vec<_>>();

        if links.is_empty() {
            return Err(DriverError::config("address lists no ClickHouse hosts"));
        }

        Ok(Self {
            links,
            active: None,
        })
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Records the outcome of a health check, one flag per link, and
    /// re-selects the active link.
    pub fn apply_health(&mut self, health: &[bool]) -> Option<usize> {
        for (link, healthy) in self.links.iter_mut().zip(health) {
            link.healthy = *healthy;
        }
        let current = self.links.iter().map(|link| link.healthy).collect::<Vec<_>>();
        self.active = select_active(&current, self.active);
        self.active
    }

    pub fn is_down(&self) -> bool {
        self.active.is_none()
    }

    pub fn active_link(&self) -> Option<&Link> {
        self.active.and_then(|index| self.links.get(index))
    }
}

/// Keeps the previous link while it is healthy, otherwise falls back to the
/// first healthy one.
pub fn select_active(health: &[bool], previous: Option<usize>) -> Option<usize> {
    if let Some(index) = previous {
        if health.get(index).copied().unwrap_or(false) {
            return Some(index);
        }
    }
    health.iter().position(|healthy| *healthy)
}

fn link_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.trim_end_matches('/').to_string();
    }
    if host.contains(':') {
        format!("http://{}", host)
    } else {
        format!("http://{}:{}", host, DEFAULT_HTTP_PORT)
    }
}
