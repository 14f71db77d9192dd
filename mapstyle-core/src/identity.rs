//! Identity types for cached styles

use serde::{Deserialize, Serialize};

use crate::{ConfigError, StyleError, StyleResult};

/// Characters that may never appear in a dbname or table name.
///
/// `|` separates key segments; the path separators and NUL would let an
/// identity escape its resource cache directory.
const FORBIDDEN_CHARS: [char; 4] = ['|', '/', '\\', '\0'];

/// Geometry type of the rendered table, used to pick a default style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    Raster,
}

impl GeometryType {
    /// Parse a PostGIS geometry type name.
    ///
    /// Accepts both `ST_MultiPolygon` and `MULTIPOLYGON` spellings,
    /// case-insensitively.
    pub fn from_postgis(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let bare = lowered.strip_prefix("st_").unwrap_or(&lowered);
        match bare {
            "point" => Some(Self::Point),
            "linestring" | "line" => Some(Self::LineString),
            "polygon" => Some(Self::Polygon),
            "multipoint" => Some(Self::MultiPoint),
            "multilinestring" => Some(Self::MultiLineString),
            "multipolygon" => Some(Self::MultiPolygon),
            "raster" => Some(Self::Raster),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::LineString => "linestring",
            Self::Polygon => "polygon",
            Self::MultiPoint => "multipoint",
            Self::MultiLineString => "multilinestring",
            Self::MultiPolygon => "multipolygon",
            Self::Raster => "raster",
        }
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request-scoped style that replaces the stored one.
///
/// Presence is expressed by `Option<StyleOverride>`, so an override whose
/// style is the empty string is still an override.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StyleOverride {
    /// Style source text.
    pub style: String,
    /// Style-source version; `None` means the configured default version.
    pub version: Option<String>,
}

impl StyleOverride {
    pub fn new(style: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// The data source a controller instance caches styles for.
///
/// Deserializing applies the same name validation as [`Identity::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct Identity {
    dbname: String,
    table: String,
    sql_filter: Option<String>,
    style_override: Option<StyleOverride>,
    geometry_type: GeometryType,
}

impl Identity {
    /// Create a validated identity without filter or override.
    ///
    /// # Errors
    /// - `ConfigError::MissingRequired` when `dbname` or `table` is empty
    /// - `ConfigError::InvalidValue` when either contains a forbidden
    ///   character or is `.`/`..`
    pub fn new(
        dbname: impl Into<String>,
        table: impl Into<String>,
        geometry_type: GeometryType,
    ) -> StyleResult<Self> {
        let dbname = dbname.into();
        let table = table.into();
        validate_name("dbname", &dbname)?;
        validate_name("table", &table)?;
        Ok(Self {
            dbname,
            table,
            sql_filter: None,
            style_override: None,
            geometry_type,
        })
    }

    /// Restrict rendering to the rows selected by `sql`.
    pub fn with_sql_filter(mut self, sql: impl Into<String>) -> Self {
        self.sql_filter = Some(sql.into());
        self
    }

    /// Render with `style_override` instead of the stored style.
    pub fn with_style_override(mut self, style_override: StyleOverride) -> Self {
        self.style_override = Some(style_override);
        self
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sql_filter(&self) -> Option<&str> {
        self.sql_filter.as_deref()
    }

    pub fn style_override(&self) -> Option<&StyleOverride> {
        self.style_override.as_ref()
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    /// Replace the active override (ephemeral style updates).
    pub fn replace_style_override(&mut self, style_override: StyleOverride) {
        self.style_override = Some(style_override);
    }
}

/// Unvalidated wire form of [`Identity`].
#[derive(Deserialize)]
struct RawIdentity {
    dbname: String,
    table: String,
    #[serde(default)]
    sql_filter: Option<String>,
    #[serde(default)]
    style_override: Option<StyleOverride>,
    geometry_type: GeometryType,
}

impl TryFrom<RawIdentity> for Identity {
    type Error = StyleError;

    fn try_from(raw: RawIdentity) -> StyleResult<Self> {
        let mut identity = Identity::new(raw.dbname, raw.table, raw.geometry_type)?;
        identity.sql_filter = raw.sql_filter;
        identity.style_override = raw.style_override;
        Ok(identity)
    }
}

fn validate_name(field: &str, value: &str) -> StyleResult<()> {
    if value.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: field.to_string(),
        }
        .into());
    }
    if value == "." || value == ".." {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "relative path components are not allowed".to_string(),
        }
        .into());
    }
    if let Some(c) = value.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: format!("contains forbidden character {:?}", c),
        }
        .into());
    }
    Ok(())
}
