//! Configuration of query compilation and pagination

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Position of the null-key bucket when grouping with `dropna=false`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullOrder {
    /// Null bucket before every other bucket
    First,
    /// Null bucket after every other bucket (pandas ordering)
    Last,
}

impl NullOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            NullOrder::First => "first",
            NullOrder::Last => "last",
        }
    }
}

impl Default for NullOrder {
    fn default() -> Self {
        NullOrder::Last
    }
}

/// Configuration for groupby query compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupByConfig {
    /// Bucket count requested from a single-column terms aggregation
    pub terms_size: usize,
    /// Buckets per page of a composite aggregation
    pub composite_page_size: usize,
    /// Upper bound on composite pages fetched for one call (None: unbounded)
    pub max_pages: Option<usize>,
    /// `precision_threshold` of cardinality (nunique) aggregations
    pub cardinality_precision_threshold: Option<u32>,
    /// tdigest compression of percentiles (median/quantile) aggregations
    pub percentiles_compression: Option<f64>,
    /// Position of the null-key bucket
    pub null_order: NullOrder,
    /// Always use composite buckets, even for a single grouping column
    pub always_composite: bool,
}

impl Default for GroupByConfig {
    fn default() -> Self {
        GroupByConfig {
            terms_size: 10_000,
            composite_page_size: 5_000,
            max_pages: None,
            cardinality_precision_threshold: Some(40_000),
            percentiles_compression: None,
            null_order: NullOrder::Last,
            always_composite: false,
        }
    }
}

impl GroupByConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.terms_size == 0 {
            return Err(Error::Config("terms_size must be greater than 0".into()));
        }
        if self.composite_page_size == 0 {
            return Err(Error::Config(
                "composite_page_size must be greater than 0".into(),
            ));
        }
        if self.max_pages == Some(0) {
            return Err(Error::Config("max_pages must be greater than 0".into()));
        }
        if let Some(threshold) = self.cardinality_precision_threshold {
            if threshold > 40_000 {
                return Err(Error::Config(format!(
                    "cardinality_precision_threshold {} exceeds the engine maximum of 40000",
                    threshold
                )));
            }
        }
        if let Some(compression) = self.percentiles_compression {
            if !(compression > 0.0) {
                return Err(Error::Config(
                    "percentiles_compression must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Parse a TOML document; missing keys take their default
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: GroupByConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document; missing keys take their default
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let config: GroupByConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&source),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&source),
            other => Err(Error::Config(format!(
                "Unsupported configuration file extension: {:?}",
                other
            ))),
        }
    }
}

/// Builder for GroupByConfig
pub struct GroupByConfigBuilder {
    config: GroupByConfig,
}

impl GroupByConfigBuilder {
    /// Creates a new builder
    pub fn new() -> Self {
        GroupByConfigBuilder {
            config: GroupByConfig::default(),
        }
    }

    /// Sets the terms aggregation size
    pub fn terms_size(mut self, size: usize) -> Self {
        self.config.terms_size = size;
        self
    }

    /// Sets the composite page size
    pub fn composite_page_size(mut self, size: usize) -> Self {
        self.config.composite_page_size = size;
        self
    }

    /// Caps the number of composite pages
    pub fn max_pages(mut self, pages: usize) -> Self {
        self.config.max_pages = Some(pages);
        self
    }

    /// Sets the cardinality precision threshold
    pub fn cardinality_precision_threshold(mut self, threshold: Option<u32>) -> Self {
        self.config.cardinality_precision_threshold = threshold;
        self
    }

    /// Sets the percentiles compression
    pub fn percentiles_compression(mut self, compression: f64) -> Self {
        self.config.percentiles_compression = Some(compression);
        self
    }

    /// Sets the null bucket position
    pub fn null_order(mut self, order: NullOrder) -> Self {
        self.config.null_order = order;
        self
    }

    /// Forces composite buckets for single-column grouping
    pub fn always_composite(mut self, always: bool) -> Self {
        self.config.always_composite = always;
        self
    }

    /// Builds and validates the config
    pub fn build(self) -> Result<GroupByConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for GroupByConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_and_validation() {
        let config = GroupByConfigBuilder::new()
            .composite_page_size(2)
            .null_order(NullOrder::First)
            .build()
            .unwrap();
        assert_eq!(config.composite_page_size, 2);
        assert_eq!(config.null_order, NullOrder::First);
        assert_eq!(config.terms_size, 10_000);

        assert!(GroupByConfigBuilder::new().terms_size(0).build().is_err());
        assert!(GroupByConfigBuilder::new()
            .cardinality_precision_threshold(Some(50_000))
            .build()
            .is_err());
    }

    #[test]
    fn test_partial_toml_and_yaml() {
        let config = GroupByConfig::from_toml_str(
            r#"
            composite_page_size = 100
            null_order = "first"
            "#,
        )
        .unwrap();
        assert_eq!(config.composite_page_size, 100);
        assert_eq!(config.null_order, NullOrder::First);
        assert_eq!(config.terms_size, GroupByConfig::default().terms_size);

        let config = GroupByConfig::from_yaml_str("always_composite: true\nmax_pages: 3\n").unwrap();
        assert!(config.always_composite);
        assert_eq!(config.max_pages, Some(3));

        assert!(matches!(
            GroupByConfig::from_toml_str("terms_size = 0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_path_dispatches_on_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "terms_size = 500").unwrap();
        let config = GroupByConfig::from_path(file.path()).unwrap();
        assert_eq!(config.terms_size, 500);

        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "null_order: last").unwrap();
        let config = GroupByConfig::from_path(file.path()).unwrap();
        assert_eq!(config.null_order, NullOrder::Last);

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            GroupByConfig::from_path(file.path()),
            Err(Error::Config(_))
        ));
    }
}
