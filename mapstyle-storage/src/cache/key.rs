//! Cache key derivation.
//!
//! Keys are plain strings so any ordered key-value store can hold them:
//!
//! ```text
//! map_style|{dbname}|{table}                                  base key
//! map_style|{dbname}|{table}|sql.{b64(filter)}                filter only
//! map_style|{dbname}|{table}|style.{b64(style)}.{b64(ver)}    override only
//! map_style|{dbname}|{table}|sql.{..}|style.{..}.{..}         both
//! ```
//!
//! Segments use URL-safe base64 without padding, whose alphabet contains
//! neither `|` nor `.`, and identity names are validated to exclude `|`.
//! Every extended key therefore starts with the base key followed by `|`,
//! which is what prefix scans use to cascade-invalidate derived entries.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use mapstyle_core::{Identity, StyleRecord, VersionResolver};

/// Leading segment of every style cache key.
pub const KEY_NAMESPACE: &str = "map_style";

const SEPARATOR: char = '|';
const SQL_TAG: &str = "sql.";
const STYLE_TAG: &str = "style.";

/// Components recovered from an extended key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub base_key: String,
    pub sql_filter: Option<String>,
    pub style_override: Option<StyleRecord>,
}

/// Pure functions computing base and extended cache keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver;

impl KeyDeriver {
    /// The canonical per-identity key.
    pub fn base_key(identity: &Identity) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            KEY_NAMESPACE,
            identity.dbname(),
            identity.table(),
            sep = SEPARATOR
        )
    }

    /// The key for a filter and/or override, or `None` when neither is set.
    ///
    /// `style_override` must already carry its resolved version so that an
    /// omitted version and an explicit default version share a key.
    pub fn extended_key(
        base_key: &str,
        sql_filter: Option<&str>,
        style_override: Option<&StyleRecord>,
    ) -> Option<String> {
        if sql_filter.is_none() && style_override.is_none() {
            return None;
        }

        let mut key = String::from(base_key);
        if let Some(sql) = sql_filter {
            key.push(SEPARATOR);
            key.push_str(SQL_TAG);
            key.push_str(&URL_SAFE_NO_PAD.encode(sql));
        }
        if let Some(record) = style_override {
            key.push(SEPARATOR);
            key.push_str(STYLE_TAG);
            key.push_str(&URL_SAFE_NO_PAD.encode(&record.style));
            key.push('.');
            key.push_str(&URL_SAFE_NO_PAD.encode(&record.version));
        }
        Some(key)
    }

    /// Both keys for `identity`, resolving a missing override version.
    pub fn keys_for(identity: &Identity, versions: &VersionResolver) -> (String, Option<String>) {
        let base = Self::base_key(identity);
        let style_override = identity.style_override().map(|o| {
            StyleRecord::new(
                o.style.as_str(),
                versions.resolve_style_version(o.version.as_deref()),
            )
        });
        let extended = Self::extended_key(&base, identity.sql_filter(), style_override.as_ref());
        (base, extended)
    }

    /// Prefix shared by every key derived from `base_key`.
    pub fn derived_prefix(base_key: &str) -> String {
        format!("{}{}", base_key, SEPARATOR)
    }

    /// Recover the components of an extended key.
    ///
    /// Returns `None` for base keys and for anything that was not produced
    /// by [`KeyDeriver::extended_key`].
    pub fn decode_extended(key: &str) -> Option<DecodedKey> {
        let mut parts = key.split(SEPARATOR);
        let namespace = parts.next()?;
        if namespace != KEY_NAMESPACE {
            return None;
        }
        let dbname = parts.next()?;
        let table = parts.next()?;

        let mut sql_filter = None;
        let mut style_override = None;
        let mut segments = 0;

        for segment in parts {
            segments += 1;
            if let Some(encoded) = segment.strip_prefix(SQL_TAG) {
                if sql_filter.is_some() || style_override.is_some() {
                    return None;
                }
                sql_filter = Some(decode_segment(encoded)?);
            } else if let Some(rest) = segment.strip_prefix(STYLE_TAG) {
                if style_override.is_some() {
                    return None;
                }
                let (style, version) = rest.split_once('.')?;
                style_override = Some(StyleRecord::new(
                    decode_segment(style)?,
                    decode_segment(version)?,
                ));
            } else {
                return None;
            }
        }

        if segments == 0 {
            return None;
        }

        Some(DecodedKey {
            base_key: format!(
                "{}{sep}{}{sep}{}",
                namespace,
                dbname,
                table,
                sep = SEPARATOR
            ),
            sql_filter,
            style_override,
        })
    }
}

fn decode_segment(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use mapstyle_core::{GeometryType, StyleOverride};
    use proptest::prelude::*;

    fn name_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every extended key starts with the derived prefix of its base key
        /// and decodes back to the inputs that produced it.
        #[test]
        fn prop_extended_key_is_prefixed_and_reversible(
            dbname in name_strategy(),
            table in name_strategy(),
            sql in proptest::option::of(any::<String>()),
            style in proptest::option::of((any::<String>(), "[0-9]\\.[0-9]\\.[0-9]")),
        ) {
            prop_assume!(sql.is_some() || style.is_some());

            let mut identity = Identity::new(dbname, table, GeometryType::Polygon)
                .expect("generated names are valid");
            if let Some(sql) = &sql {
                identity = identity.with_sql_filter(sql.clone());
            }
            if let Some((source, version)) = &style {
                identity = identity.with_style_override(
                    StyleOverride::new(source.clone()).with_version(version.clone()),
                );
            }

            let (base, extended) = KeyDeriver::keys_for(&identity, &VersionResolver::new("3.0.12", "2.0.0"));
            let extended = extended.expect("overrides produce an extended key");
            prop_assert!(extended.starts_with(&KeyDeriver::derived_prefix(&base)));

            let decoded = KeyDeriver::decode_extended(&extended).expect("key should decode");
            prop_assert_eq!(decoded.base_key, base);
            prop_assert_eq!(decoded.sql_filter, sql);
            prop_assert_eq!(
                decoded.style_override,
                style.map(|(s, v)| StyleRecord::new(s, v))
            );
        }

        /// Distinct filters never collide.
        #[test]
        fn prop_distinct_filters_yield_distinct_keys(a in any::<String>(), b in any::<String>()) {
            prop_assume!(a != b);
            let base = "map_style|gis|roads";
            let ka = KeyDeriver::extended_key(base, Some(&a), None);
            let kb = KeyDeriver::extended_key(base, Some(&b), None);
            prop_assert_ne!(ka, kb);
        }
    }
}
