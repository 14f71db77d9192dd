//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{ConfigError, GeometryType, StyleResult};

/// Spherical mercator, the projection tiles are rendered in by default.
pub const WEB_MERCATOR: &str = "+proj=merc +a=6378137 +b=6378137 +lat_ts=0.0 +lon_0=0.0 \
+x_0=0.0 +y_0=0 +k=1.0 +units=m +nadgrids=@null +wktext +no_defs +over";

/// Placeholder substituted with the table name in default style bodies.
pub const TABLE_PLACEHOLDER: &str = "{table}";

/// Connection parameters embedded in every compiler document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub geometry_field: String,
    pub srid: u32,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            geometry_field: "the_geom_webmercator".to_string(),
            srid: 3857,
        }
    }
}

impl DatasourceConfig {
    /// Build from `MAPSTYLE_DB_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("MAPSTYLE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("MAPSTYLE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            user: std::env::var("MAPSTYLE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("MAPSTYLE_DB_PASSWORD").ok(),
            geometry_field: defaults.geometry_field,
            srid: defaults.srid,
        }
    }
}

/// Default style bodies per geometry type.
///
/// Used when an identity has no stored style yet. Bodies may contain
/// [`TABLE_PLACEHOLDER`], which is replaced by the table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultStyles {
    styles: BTreeMap<GeometryType, String>,
}

impl DefaultStyles {
    /// An empty table; every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plain point, line and polygon styles.
    pub fn standard() -> Self {
        let point = "#{table} {marker-fill: #FF6600; marker-opacity: 1; marker-width: 16; \
marker-line-color: white; marker-line-width: 3; marker-line-opacity: 0.9; \
marker-placement: point; marker-type: ellipse; marker-allow-overlap: true;}";
        let line = "#{table} {line-color: #FF6600; line-width: 1; line-opacity: 0.7;}";
        let polygon = "#{table} {polygon-fill: #FF6600; polygon-opacity: 0.7; \
line-opacity: 1; line-color: #FFFFFF;}";

        Self::empty()
            .with(GeometryType::Point, point)
            .with(GeometryType::MultiPoint, point)
            .with(GeometryType::LineString, line)
            .with(GeometryType::MultiLineString, line)
            .with(GeometryType::Polygon, polygon)
            .with(GeometryType::MultiPolygon, polygon)
    }

    /// Set the default body for a geometry type.
    pub fn with(mut self, geometry_type: GeometryType, style: impl Into<String>) -> Self {
        self.styles.insert(geometry_type, style.into());
        self
    }

    /// The default style for `geometry_type`, with the table substituted.
    ///
    /// # Errors
    /// `ConfigError::NoDefaultStyle` when nothing is configured for the type.
    pub fn style_for(&self, geometry_type: GeometryType, table: &str) -> StyleResult<String> {
        self.styles
            .get(&geometry_type)
            .map(|body| body.replace(TABLE_PLACEHOLDER, table))
            .ok_or_else(|| ConfigError::NoDefaultStyle { geometry_type }.into())
    }

    pub fn contains(&self, geometry_type: GeometryType) -> bool {
        self.styles.contains_key(&geometry_type)
    }
}

/// Controller configuration shared by every identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleCacheConfig {
    /// Compiler version artifacts must be produced by to count as fresh.
    pub target_version: String,
    /// Style-source version assumed for default styles and unversioned overrides.
    pub default_style_version: String,
    pub datasource: DatasourceConfig,
    /// Output projection of the compiled document.
    pub srs: String,
    /// Root under which each identity gets its localized-resource directory.
    pub resource_cache_root: PathBuf,
    pub default_styles: DefaultStyles,
}

impl StyleCacheConfig {
    /// Create a config with standard defaults for everything but the versions.
    pub fn new(target_version: impl Into<String>, default_style_version: impl Into<String>) -> Self {
        Self {
            target_version: target_version.into(),
            default_style_version: default_style_version.into(),
            datasource: DatasourceConfig::default(),
            srs: WEB_MERCATOR.to_string(),
            resource_cache_root: std::env::temp_dir().join("mapstyle"),
            default_styles: DefaultStyles::standard(),
        }
    }

    pub fn with_datasource(mut self, datasource: DatasourceConfig) -> Self {
        self.datasource = datasource;
        self
    }

    pub fn with_srs(mut self, srs: impl Into<String>) -> Self {
        self.srs = srs.into();
        self
    }

    pub fn with_resource_cache_root(mut self, root: impl AsRef<Path>) -> Self {
        self.resource_cache_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_default_styles(mut self, default_styles: DefaultStyles) -> Self {
        self.default_styles = default_styles;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - target and default style versions are non-empty
    /// - the output projection is non-empty
    /// - datasource host and geometry field are non-empty
    pub fn validate(&self) -> StyleResult<()> {
        let required = [
            ("target_version", self.target_version.as_str()),
            ("default_style_version", self.default_style_version.as_str()),
            ("srs", self.srs.as_str()),
            ("datasource.host", self.datasource.host.as_str()),
            ("datasource.geometry_field", self.datasource.geometry_field.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: field.to_string(),
                }
                .into());
            }
        }
        if self.resource_cache_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "resource_cache_root".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
