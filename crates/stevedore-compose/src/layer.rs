//! Ordered merging of compose layers.
//!
//! Each layer is parsed into a [`LayerValue`] tree. Layers are folded left
//! to right:
//!
//! - scalars: the last layer that sets the field wins;
//! - mappings: merged key by key, recursing into nested mappings;
//! - lists: replaced wholesale by the last layer that defines them.
//!
//! `Null` is compatible with every type. An overlay `Null` (a bare `web:`)
//! leaves an existing value untouched; it only fills a field no earlier layer
//! set. Any other disagreement on a field's
//! type is a [`ConfigError::ConflictingType`]. The result depends only on the
//! order of the given paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use stevedore_common::error::ConfigError;

use crate::naming::ContainerNameRegistry;

/// A node of a parsed compose layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerValue {
    /// Explicit null or empty value.
    Null,
    /// Boolean, number or string.
    Scalar(Value),
    /// Ordered key/value pairs.
    Mapping(Vec<(String, LayerValue)>),
    /// Sequence of values.
    List(Vec<LayerValue>),
}

impl LayerValue {
    /// Human-readable type name used in conflict errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar(_) => "scalar",
            Self::Mapping(_) => "mapping",
            Self::List(_) => "list",
        }
    }

    /// Looks up a direct child of a mapping.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Self> {
        match self {
            Self::Mapping(entries) => entries
                .iter_mut()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns the scalar rendered as a string.
    #[must_use]
    pub fn as_scalar_str(&self) -> Option<String> {
        match self {
            Self::Scalar(Value::String(s)) => Some(s.clone()),
            Self::Scalar(Value::Number(n)) => Some(n.to_string()),
            Self::Scalar(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    fn from_yaml(value: Value, layer: &Path, field: &str) -> Result<Self, ConfigError> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Self::Scalar(value),
            Value::Sequence(items) => Self::List(
                items
                    .into_iter()
                    .map(|item| Self::from_yaml(item, layer, field))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let key = mapping_key(key, layer, field)?;
                    let child = join_field(field, &key);
                    entries.push((key, Self::from_yaml(value, layer, &child)?));
                }
                Self::Mapping(entries)
            }
            Value::Tagged(tagged) => Self::from_yaml(tagged.value, layer, field)?,
        })
    }

    fn to_yaml(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Scalar(v) => v.clone(),
            Self::List(items) => Value::Sequence(items.iter().map(Self::to_yaml).collect()),
            Self::Mapping(entries) => {
                let mut map = serde_yaml::Mapping::new();
                for (k, v) in entries {
                    let _ = map.insert(Value::String(k.clone()), v.to_yaml());
                }
                Value::Mapping(map)
            }
        }
    }

    fn interpolate(&self, env: &BTreeMap<String, String>) -> Self {
        match self {
            Self::Scalar(Value::String(s)) => Self::Scalar(Value::String(interpolate_str(s, env))),
            Self::List(items) => Self::List(items.iter().map(|i| i.interpolate(env)).collect()),
            Self::Mapping(entries) => Self::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.interpolate(env)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn mapping_key(key: Value, layer: &Path, field: &str) -> Result<String, ConfigError> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ConfigError::InvalidLayer {
            path: layer.to_path_buf(),
            message: format!("unsupported key {other:?} under `{field}`"),
        }),
    }
}

fn join_field(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Reads one layer file into a tree.
///
/// An empty file yields an empty mapping.
///
/// # Errors
///
/// Returns [`ConfigError::LayerNotFound`] if the file is missing and
/// [`ConfigError::InvalidLayer`] if it is not a YAML mapping.
pub fn load_layer(path: &Path) -> Result<LayerValue, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::LayerNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    parse_layer(&content, path)
}

/// Parses layer content. `path` is only used in errors.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidLayer`] if the content is not a YAML mapping.
pub fn parse_layer(content: &str, path: &Path) -> Result<LayerValue, ConfigError> {
    let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::InvalidLayer {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    match LayerValue::from_yaml(value, path, "")? {
        LayerValue::Null => Ok(LayerValue::Mapping(Vec::new())),
        root @ LayerValue::Mapping(_) => Ok(root),
        other => Err(ConfigError::InvalidLayer {
            path: path.to_path_buf(),
            message: format!("top level must be a mapping, found a {}", other.kind()),
        }),
    }
}

/// Merges the layer files at `layer_paths`, in order.
///
/// Every path is checked for existence before any is parsed, so a missing
/// layer fails fast.
///
/// # Errors
///
/// Returns [`ConfigError::LayerNotFound`], [`ConfigError::InvalidLayer`] or
/// [`ConfigError::ConflictingType`].
pub fn merge(layer_paths: &[PathBuf]) -> Result<MergedLayer, ConfigError> {
    if let Some(missing) = layer_paths.iter().find(|p| !p.is_file()) {
        return Err(ConfigError::LayerNotFound {
            path: missing.clone(),
        });
    }
    let layers = layer_paths
        .iter()
        .map(|p| load_layer(p).map(|v| (p.clone(), v)))
        .collect::<Result<Vec<_>, _>>()?;
    merge_layers(layers)
}

/// Merges already parsed layers, in order.
///
/// # Errors
///
/// Returns [`ConfigError::ConflictingType`] if two layers disagree on the
/// type of a field.
pub fn merge_layers(
    layers: impl IntoIterator<Item = (PathBuf, LayerValue)>,
) -> Result<MergedLayer, ConfigError> {
    let mut root = LayerValue::Mapping(Vec::new());
    let mut sources = Vec::new();
    for (path, layer) in layers {
        tracing::debug!(layer = %path.display(), "merging compose layer");
        merge_value(&mut root, layer, "", &path)?;
        sources.push(path);
    }
    Ok(MergedLayer { root, sources })
}

fn merge_value(
    base: &mut LayerValue,
    overlay: LayerValue,
    field: &str,
    layer: &Path,
) -> Result<(), ConfigError> {
    let compatible = matches!(base, LayerValue::Null)
        || matches!(overlay, LayerValue::Null)
        || base.kind() == overlay.kind();
    if !compatible {
        return Err(ConfigError::ConflictingType {
            field: if field.is_empty() { "<root>".into() } else { field.to_string() },
            path: layer.to_path_buf(),
            expected: base.kind(),
            found: overlay.kind(),
        });
    }
    match (base, overlay) {
        (slot, LayerValue::Null) if !matches!(slot, LayerValue::Null) => Ok(()),
        (LayerValue::Mapping(entries), LayerValue::Mapping(overlay_entries)) => {
            for (key, value) in overlay_entries {
                let child = join_field(field, &key);
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, slot)) => merge_value(slot, value, &child, layer)?,
                    None => entries.push((key, value)),
                }
            }
            Ok(())
        }
        (slot, value) => {
            *slot = value;
            Ok(())
        }
    }
}

/// A service as declared in the merged layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Logical service name.
    pub name: String,
    /// Image reference, if declared.
    pub image: Option<String>,
    /// Services that must be running first.
    pub depends_on: Vec<String>,
    /// Bind mounts and volumes in short `source:target[:mode]` form.
    pub volumes: Vec<String>,
}

/// The effective configuration produced by merging all layers.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedLayer {
    root: LayerValue,
    sources: Vec<PathBuf>,
}

impl MergedLayer {
    /// The merged tree.
    #[must_use]
    pub const fn root(&self) -> &LayerValue {
        &self.root
    }

    /// Layers that contributed, in merge order.
    #[must_use]
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Follows `path` through nested mappings.
    #[must_use]
    pub fn get(&self, path: &[&str]) -> Option<&LayerValue> {
        path.iter().try_fold(&self.root, |node, key| node.get(key))
    }

    /// Declared services in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLayer`] if `services` is missing or a
    /// service definition has an unexpected shape.
    pub fn services(&self) -> Result<Vec<ServiceSpec>, ConfigError> {
        let Some(LayerValue::Mapping(services)) = self.root.get("services") else {
            return Err(self.invalid("no `services` mapping declared".into()));
        };
        services
            .iter()
            .map(|(name, def)| self.service_spec(name, def))
            .collect()
    }

    fn service_spec(&self, name: &str, def: &LayerValue) -> Result<ServiceSpec, ConfigError> {
        let depends_on = match def.get("depends_on") {
            None | Some(LayerValue::Null) => Vec::new(),
            Some(LayerValue::List(items)) => items
                .iter()
                .map(|i| {
                    i.as_scalar_str().ok_or_else(|| {
                        self.invalid(format!("services.{name}.depends_on entries must be names"))
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(LayerValue::Mapping(entries)) => entries.iter().map(|(k, _)| k.clone()).collect(),
            Some(LayerValue::Scalar(_)) => {
                return Err(self.invalid(format!(
                    "services.{name}.depends_on must be a list or mapping"
                )));
            }
        };
        let volumes = match def.get("volumes") {
            Some(LayerValue::List(items)) => items.iter().filter_map(render_volume).collect(),
            _ => Vec::new(),
        };
        Ok(ServiceSpec {
            name: name.to_string(),
            image: def.get("image").and_then(LayerValue::as_scalar_str),
            depends_on,
            volumes,
        })
    }

    /// Returns a copy with `${VAR}`, `${VAR:-default}`, `${VAR-default}` and
    /// `$VAR` substituted in every string scalar. `$$` yields a literal `$`.
    #[must_use]
    pub fn interpolate(&self, env: &BTreeMap<String, String>) -> Self {
        Self {
            root: self.root.interpolate(env),
            sources: self.sources.clone(),
        }
    }

    /// Sets `container_name` on every service from `registry`.
    pub fn apply_container_names(&mut self, registry: &ContainerNameRegistry) {
        let Some(LayerValue::Mapping(services)) = self.root.get_mut("services") else {
            return;
        };
        for (service, def) in services.iter_mut() {
            let Ok(container) = registry.resolve(service) else {
                continue;
            };
            let value = LayerValue::Scalar(Value::String(container.to_string()));
            if matches!(def, LayerValue::Null) {
                *def = LayerValue::Mapping(Vec::new());
            }
            if let LayerValue::Mapping(entries) = def {
                match entries.iter_mut().find(|(k, _)| k == "container_name") {
                    Some((_, slot)) => *slot = value,
                    None => entries.push(("container_name".into(), value)),
                }
            }
        }
    }

    /// Serializes the merged tree back to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLayer`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.root.to_yaml()).map_err(|e| self.invalid(e.to_string()))
    }

    fn invalid(&self, message: String) -> ConfigError {
        ConfigError::InvalidLayer {
            path: self.sources.last().cloned().unwrap_or_default(),
            message,
        }
    }
}

fn render_volume(item: &LayerValue) -> Option<String> {
    if let Some(short) = item.as_scalar_str() {
        return Some(short);
    }
    let source = item.get("source").and_then(LayerValue::as_scalar_str);
    let target = item.get("target").and_then(LayerValue::as_scalar_str)?;
    Some(source.map_or_else(|| target.clone(), |s| format!("{s}:{target}")))
}

fn interpolate_str(input: &str, env: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        if let Some(after) = rest.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(braced) = rest.strip_prefix('{') {
            let Some(end) = braced.find('}') else {
                out.push_str("${");
                rest = braced;
                continue;
            };
            out.push_str(&expand(&braced[..end], env));
            rest = &braced[end + 1..];
        } else {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if len == 0 {
                out.push('$');
            } else {
                out.push_str(env.get(&rest[..len]).map_or("", String::as_str));
            }
            rest = &rest[len..];
        }
    }
    out.push_str(rest);
    out
}

fn expand(expr: &str, env: &BTreeMap<String, String>) -> String {
    if let Some((name, default)) = expr.split_once(":-") {
        return env
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| default.to_string());
    }
    if let Some((name, default)) = expr.split_once('-') {
        return env.get(name).cloned().unwrap_or_else(|| default.to_string());
    }
    env.get(expr).cloned().unwrap_or_default()
}
