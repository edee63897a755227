//! Connector configuration
//!
//! The sink framework hands the connector a flat `key -> value` property
//! map. Recognized keys:
//!
//! | key | effect |
//! |---|---|
//! | `name` | connector name (framework-provided) |
//! | `topics` | comma-separated source topics |
//! | `iceberg.tables` | destination tables for static routing |
//! | `iceberg.tables.dynamic-enabled` | route-field value IS the table name |
//! | `iceberg.tables.route-field` | dotted path into the record value |
//! | `iceberg.tables.<table>.route-regex` | per-table regex for static routing |
//! | `iceberg.control.topic` | control topic name |
//! | `iceberg.control.group-id` | coordinator consumer group |
//! | `iceberg.control.commit.interval-ms` | commit round period |
//! | `iceberg.control.commit.timeout-ms` | per-round deadline |
//! | `iceberg.hadoop-conf-dir` | catalog wiring |
//! | `iceberg.catalog.*` | catalog wiring |

use crate::error::{ConnectError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Prefix for the transient worker consumer groups
pub const CONTROL_GROUP_PREFIX: &str = "cg-control-";

const DEFAULT_CONTROL_TOPIC: &str = "control-iceberg";
const DEFAULT_COMMIT_INTERVAL_MS: u64 = 300_000;
const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 120_000;

const PROP_TABLES: &str = "iceberg.tables";
const PROP_DYNAMIC_ENABLED: &str = "iceberg.tables.dynamic-enabled";
const PROP_ROUTE_FIELD: &str = "iceberg.tables.route-field";
const PROP_CONTROL_TOPIC: &str = "iceberg.control.topic";
const PROP_CONTROL_GROUP_ID: &str = "iceberg.control.group-id";
const PROP_COMMIT_INTERVAL_MS: &str = "iceberg.control.commit.interval-ms";
const PROP_COMMIT_TIMEOUT_MS: &str = "iceberg.control.commit.timeout-ms";
const PROP_HADOOP_CONF_DIR: &str = "iceberg.hadoop-conf-dir";
const PROP_CATALOG_PREFIX: &str = "iceberg.catalog.";
const PROP_ROUTE_REGEX_SUFFIX: &str = ".route-regex";

/// Resolved connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Connector name, used for diagnostics and group-id defaults
    pub name: String,
    /// Source topics the sink consumes
    pub source_topics: Vec<String>,
    /// Destination tables for static routing
    pub tables: Vec<String>,
    /// When true, the route-field value IS the (lowercased) table name
    pub dynamic_tables_enabled: bool,
    /// Dotted path into the record value used for routing
    pub route_field: Option<String>,
    /// Per-table route regexes for static regex routing
    table_route_regex: HashMap<String, Regex>,
    /// Control topic name
    pub control_topic: String,
    /// Coordinator consumer group; also the durable store for source offsets
    pub control_group_id: String,
    /// Commit round period
    pub commit_interval: Duration,
    /// Per-round deadline before the coordinator abandons the round
    pub commit_timeout: Duration,
    /// Catalog wiring properties (`iceberg.catalog.*` with the prefix stripped)
    pub catalog_props: HashMap<String, String>,
    /// Hadoop configuration directory, when the catalog needs one
    pub hadoop_conf_dir: Option<String>,
}

impl ConnectorConfig {
    /// Build a configuration from the framework property map and check the
    /// fatal-misconfiguration rules. Unrecognized keys are ignored.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let name = props.get("name").cloned().unwrap_or_default();

        let source_topics = props
            .get("topics")
            .map(|s| split_csv(s))
            .unwrap_or_default();

        let tables = props
            .get(PROP_TABLES)
            .map(|s| split_csv(s))
            .unwrap_or_default();

        let dynamic_tables_enabled = props
            .get(PROP_DYNAMIC_ENABLED)
            .map(|v| parse_bool(PROP_DYNAMIC_ENABLED, v))
            .transpose()?
            .unwrap_or(false);

        let route_field = props.get(PROP_ROUTE_FIELD).cloned();

        let mut table_route_regex = HashMap::new();
        for (key, value) in props {
            if let Some(rest) = key.strip_prefix(PROP_TABLES) {
                if let Some(table) = rest
                    .strip_prefix('.')
                    .and_then(|r| r.strip_suffix(PROP_ROUTE_REGEX_SUFFIX))
                {
                    // Anchored at compile time: a record routes to a table
                    // only when the ENTIRE route value matches the pattern,
                    // not any substring of it.
                    let regex = Regex::new(&format!("^(?:{value})$")).map_err(|e| {
                        ConnectError::config(format!("invalid route regex for {table}: {e}"))
                    })?;
                    table_route_regex.insert(table.to_string(), regex);
                }
            }
        }

        let control_topic = props
            .get(PROP_CONTROL_TOPIC)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTROL_TOPIC.to_string());

        let control_group_id = props
            .get(PROP_CONTROL_GROUP_ID)
            .cloned()
            .unwrap_or_else(|| format!("{CONTROL_GROUP_PREFIX}{name}"));

        let commit_interval = Duration::from_millis(
            props
                .get(PROP_COMMIT_INTERVAL_MS)
                .map(|v| parse_millis(PROP_COMMIT_INTERVAL_MS, v))
                .transpose()?
                .unwrap_or(DEFAULT_COMMIT_INTERVAL_MS),
        );

        let commit_timeout = Duration::from_millis(
            props
                .get(PROP_COMMIT_TIMEOUT_MS)
                .map(|v| parse_millis(PROP_COMMIT_TIMEOUT_MS, v))
                .transpose()?
                .unwrap_or(DEFAULT_COMMIT_TIMEOUT_MS),
        );

        let catalog_props = props
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(PROP_CATALOG_PREFIX)
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect();

        let config = Self {
            name,
            source_topics,
            tables,
            dynamic_tables_enabled,
            route_field,
            table_route_regex,
            control_topic,
            control_group_id,
            commit_interval,
            commit_timeout,
            catalog_props,
            hadoop_conf_dir: props.get(PROP_HADOOP_CONF_DIR).cloned(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Fatal-misconfiguration checks, run once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.dynamic_tables_enabled && self.route_field.is_none() {
            return Err(ConnectError::config(
                "dynamic table routing requires iceberg.tables.route-field",
            ));
        }
        if !self.dynamic_tables_enabled && self.tables.is_empty() {
            return Err(ConnectError::config(
                "static routing requires a non-empty iceberg.tables list",
            ));
        }
        if self.source_topics.is_empty() {
            return Err(ConnectError::config("no source topics configured"));
        }
        if self.control_topic.is_empty() {
            return Err(ConnectError::config("control topic must not be empty"));
        }
        if self.commit_interval.is_zero() {
            return Err(ConnectError::config("commit interval must be positive"));
        }
        Ok(())
    }

    /// Route regex configured for a static destination table, if any.
    pub fn table_route_regex(&self, table: &str) -> Option<&Regex> {
        self.table_route_regex.get(table)
    }

    /// Fresh transient group id for a worker's control consumer. Workers
    /// never commit offsets under this group, so every restart gets a new
    /// one and starts reading at the end of the control topic.
    pub fn transient_control_group_id(&self) -> String {
        format!("{CONTROL_GROUP_PREFIX}{}", Uuid::new_v4())
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConnectError::config(format!(
            "{key}: expected true or false, got {other}"
        ))),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| ConnectError::config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_props() -> HashMap<String, String> {
        HashMap::from([
            ("name".to_string(), "events-sink".to_string()),
            ("topics".to_string(), "orders, payments".to_string()),
            ("iceberg.tables".to_string(), "db.orders".to_string()),
        ])
    }

    #[test]
    fn test_defaults() {
        let config = ConnectorConfig::from_properties(&base_props()).unwrap();
        assert_eq!(config.control_topic, "control-iceberg");
        assert_eq!(config.control_group_id, "cg-control-events-sink");
        assert_eq!(config.commit_interval, Duration::from_millis(300_000));
        assert_eq!(config.commit_timeout, Duration::from_millis(120_000));
        assert_eq!(config.source_topics, vec!["orders", "payments"]);
        assert!(!config.dynamic_tables_enabled);
    }

    #[test]
    fn test_route_regex_parsing() {
        let mut props = base_props();
        props.insert(
            "iceberg.tables".to_string(),
            "db.orders,db.payments".to_string(),
        );
        props.insert(
            "iceberg.tables.route-field".to_string(),
            "type".to_string(),
        );
        props.insert(
            "iceberg.tables.db.orders.route-regex".to_string(),
            "order-.*".to_string(),
        );

        let config = ConnectorConfig::from_properties(&props).unwrap();
        let regex = config.table_route_regex("db.orders").unwrap();
        assert!(regex.is_match("order-created"));
        assert!(config.table_route_regex("db.payments").is_none());
    }

    #[test]
    fn test_route_regex_matches_full_value_only() {
        let mut props = base_props();
        props.insert(
            "iceberg.tables.route-field".to_string(),
            "type".to_string(),
        );
        props.insert(
            "iceberg.tables.db.orders.route-regex".to_string(),
            "ord".to_string(),
        );

        let config = ConnectorConfig::from_properties(&props).unwrap();
        let regex = config.table_route_regex("db.orders").unwrap();
        assert!(regex.is_match("ord"));
        // A substring hit is not a route match.
        assert!(!regex.is_match("coordination"));
        assert!(!regex.is_match("ordered"));
        assert!(!regex.is_match("record"));
    }

    #[test]
    fn test_dynamic_requires_route_field() {
        let mut props = base_props();
        props.insert(
            "iceberg.tables.dynamic-enabled".to_string(),
            "true".to_string(),
        );
        let err = ConnectorConfig::from_properties(&props).unwrap_err();
        assert!(matches!(err, ConnectError::Config(_)));

        props.insert(
            "iceberg.tables.route-field".to_string(),
            "meta.table".to_string(),
        );
        assert!(ConnectorConfig::from_properties(&props).is_ok());
    }

    #[test]
    fn test_static_requires_tables() {
        let mut props = base_props();
        props.remove("iceberg.tables");
        assert!(ConnectorConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut props = base_props();
        props.insert(
            "iceberg.tables.db.orders.route-regex".to_string(),
            "([".to_string(),
        );
        assert!(ConnectorConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_catalog_props_stripped() {
        let mut props = base_props();
        props.insert(
            "iceberg.catalog.uri".to_string(),
            "http://localhost:8181".to_string(),
        );
        props.insert(
            "iceberg.catalog.warehouse".to_string(),
            "s3://bucket/warehouse".to_string(),
        );
        let config = ConnectorConfig::from_properties(&props).unwrap();
        assert_eq!(
            config.catalog_props.get("uri"),
            Some(&"http://localhost:8181".to_string())
        );
        assert_eq!(
            config.catalog_props.get("warehouse"),
            Some(&"s3://bucket/warehouse".to_string())
        );
    }

    #[test]
    fn test_transient_group_ids_are_unique() {
        let config = ConnectorConfig::from_properties(&base_props()).unwrap();
        let a = config.transient_control_group_id();
        let b = config.transient_control_group_id();
        assert_ne!(a, b);
        assert!(a.starts_with(CONTROL_GROUP_PREFIX));
    }
}
