// src/routes.rs
//
// Route table: the validated, read-only view of the route list.
// Built once at startup and shared between the relays and the inbound router.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;
use crate::settings::RouteConfig;

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteConfig>,
    /// inbound topic -> routes declaring it, in input order
    by_inbound: HashMap<String, Vec<RouteConfig>>,
}

impl RouteTable {
    /// Validate the route list and index it by inbound topic.
    ///
    /// A port may appear in at most one route, since each port is owned by a
    /// single relay. Several routes may share an inbound topic; messages on it
    /// fan out to all of them.
    pub fn build(routes: Vec<RouteConfig>) -> Result<Self, ConfigError> {
        let mut seen_ports = HashSet::new();
        let mut by_inbound: HashMap<String, Vec<RouteConfig>> = HashMap::new();

        for (index, route) in routes.iter().enumerate() {
            route.validate(index)?;
            if !seen_ports.insert(route.port.as_str()) {
                return Err(ConfigError::DuplicatePort(route.port.clone()));
            }
            by_inbound
                .entry(route.inbound_topic.clone())
                .or_default()
                .push(route.clone());
        }

        Ok(Self { routes, by_inbound })
    }

    pub fn lookup_by_inbound_topic(&self, topic: &str) -> &[RouteConfig] {
        self.by_inbound
            .get(topic)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All routes in configuration order
    pub fn all(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// Inbound topics to subscribe to, each once, in first-seen order
    pub fn inbound_topics(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.routes
            .iter()
            .map(|r| r.inbound_topic.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(port: &str, out: &str, inbound: &str) -> RouteConfig {
        RouteConfig::new(port, 9600, out, inbound)
    }

    #[test]
    fn test_build_and_lookup() {
        let table = RouteTable::build(vec![
            route("P1", "a/out", "a/in"),
            route("P2", "b/out", "b/in"),
        ])
        .unwrap();

        let hits = table.lookup_by_inbound_topic("a/in");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].port, "P1");
        assert!(table.lookup_by_inbound_topic("a/out").is_empty());
        assert!(table.lookup_by_inbound_topic("unknown").is_empty());
    }

    #[test]
    fn test_all_preserves_input_order() {
        let table = RouteTable::build(vec![
            route("P3", "c/out", "c/in"),
            route("P1", "a/out", "a/in"),
            route("P2", "b/out", "b/in"),
        ])
        .unwrap();
        let ports: Vec<&str> = table.all().iter().map(|r| r.port.as_str()).collect();
        assert_eq!(ports, vec!["P3", "P1", "P2"]);
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let err = RouteTable::build(vec![
            route("P1", "a/out", "a/in"),
            route("P1", "b/out", "b/in"),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::DuplicatePort("P1".to_string()));
    }

    #[test]
    fn test_blank_topic_rejected() {
        let err = RouteTable::build(vec![route("P1", "a/out", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTopic { .. }));
    }

    #[test]
    fn test_shared_inbound_topic_fans_out_and_dedupes() {
        let table = RouteTable::build(vec![
            route("P1", "a/out", "shared/in"),
            route("P2", "b/out", "other/in"),
            route("P3", "c/out", "shared/in"),
        ])
        .unwrap();

        let ports: Vec<&str> = table
            .lookup_by_inbound_topic("shared/in")
            .iter()
            .map(|r| r.port.as_str())
            .collect();
        assert_eq!(ports, vec!["P1", "P3"]);
        assert_eq!(table.inbound_topics(), vec!["shared/in", "other/in"]);
    }

    #[test]
    fn test_empty_table() {
        let table = RouteTable::build(Vec::new()).unwrap();
        assert!(table.is_empty());
        assert!(table.inbound_topics().is_empty());
    }
}
