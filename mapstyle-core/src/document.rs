//! Compiler input document.
//!
//! Merges the identity and datasource configuration with exactly one style
//! body. The document is what localizers rewrite and compilers consume.

use serde::{Deserialize, Serialize};

use crate::{DatasourceConfig, GeometryType, Identity, StyleCacheConfig};

/// Alias given to filtered subqueries in the layer datasource.
const SUBQUERY_ALIAS: &str = "mapstyle_q";

/// The single stylesheet of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stylesheet {
    pub id: String,
    pub data: String,
}

/// PostGIS datasource of the rendered layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDatasource {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub dbname: String,
    /// Table name, or a parenthesized subquery when a filter is active.
    pub table: String,
    pub geometry_field: String,
    pub srid: u32,
}

/// The rendered layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub srs: String,
    pub geometry: GeometryType,
    pub datasource: LayerDatasource,
}

/// Input handed to the resource localizer and then to the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDocument {
    /// Output projection.
    pub srs: String,
    pub stylesheet: Stylesheet,
    pub layer: Layer,
}

impl StyleDocument {
    /// Build the document for `identity` rendering `style`.
    pub fn build(identity: &Identity, config: &StyleCacheConfig, style: &str) -> Self {
        let table = match identity.sql_filter() {
            Some(sql) => format!("({}) as {}", sql, SUBQUERY_ALIAS),
            None => identity.table().to_string(),
        };

        Self {
            srs: config.srs.clone(),
            stylesheet: Stylesheet {
                id: "style.mss".to_string(),
                data: style.to_string(),
            },
            layer: Layer {
                id: identity.table().to_string(),
                name: identity.table().to_string(),
                srs: config.srs.clone(),
                geometry: identity.geometry_type(),
                datasource: layer_datasource(&config.datasource, identity.dbname(), table),
            },
        }
    }

    pub fn style(&self) -> &str {
        &self.stylesheet.data
    }
}

fn layer_datasource(datasource: &DatasourceConfig, dbname: &str, table: String) -> LayerDatasource {
    LayerDatasource {
        kind: "postgis".to_string(),
        host: datasource.host.clone(),
        port: datasource.port,
        user: datasource.user.clone(),
        password: datasource.password.clone(),
        dbname: dbname.to_string(),
        table,
        geometry_field: datasource.geometry_field.clone(),
        srid: datasource.srid,
    }
}
