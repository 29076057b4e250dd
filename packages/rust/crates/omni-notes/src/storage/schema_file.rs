//! `<module>.schema.yml` parsing, validation and serialization.

use crate::model::{ROOT_FNAME, SCHEMA_FILE_VERSION, SchemaModule, SchemaProps};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    imports: Vec<String>,
    schemas: Vec<SchemaProps>,
}

fn default_version() -> u32 {
    SCHEMA_FILE_VERSION
}

/// Parse and validate a schema module file.
///
/// The module root is the schema whose `parent` is `root`; a file with a single
/// schema and no explicit parent uses that schema as its root.
///
/// # Errors
///
/// Returns a message describing the first problem found.
pub fn parse_schema_module(content: &str, fname: &str, vault: &str) -> Result<SchemaModule, String> {
    let file: SchemaFile = serde_yaml::from_str(content).map_err(|err| err.to_string())?;
    if file.schemas.is_empty() {
        return Err("schema file declares no schemas".to_string());
    }

    let mut schemas: BTreeMap<String, SchemaProps> = BTreeMap::new();
    for schema in file.schemas {
        if schema.id.trim().is_empty() {
            return Err("schema with empty id".to_string());
        }
        if schemas.contains_key(&schema.id) {
            return Err(format!("duplicate schema id `{}`", schema.id));
        }
        schemas.insert(schema.id.clone(), schema);
    }

    let roots: Vec<&str> = schemas
        .values()
        .filter(|schema| schema.parent.as_deref() == Some(ROOT_FNAME))
        .map(|schema| schema.id.as_str())
        .collect();
    let root_id = match roots.as_slice() {
        [single] => (*single).to_string(),
        [] if schemas.len() == 1 => schemas.keys().next().cloned().unwrap_or_default(),
        [] => return Err("no schema has `parent: root`".to_string()),
        _ => return Err(format!("multiple root schemas: {}", roots.join(", "))),
    };

    let module = SchemaModule {
        id: root_id,
        fname: fname.to_string(),
        vault: vault.to_string(),
        version: file.version,
        imports: file.imports,
        schemas,
    };
    validate_schema_module(&module)?;
    Ok(module)
}

/// Check child references and reachability from the root.
///
/// # Errors
///
/// Returns a message describing the first problem found.
pub fn validate_schema_module(module: &SchemaModule) -> Result<(), String> {
    if module.root().is_none() {
        return Err(format!("root schema `{}` is missing", module.id));
    }
    for schema in module.schemas.values() {
        if let Some(missing) = schema
            .children
            .iter()
            .find(|child| !module.schemas.contains_key(*child))
        {
            return Err(format!(
                "schema `{}` lists unknown child `{missing}`",
                schema.id
            ));
        }
        if let Some(pattern) = &schema.pattern
            && let Err(err) = globset::Glob::new(pattern)
        {
            return Err(format!("schema `{}` has invalid pattern: {err}", schema.id));
        }
    }

    // Every child must be reachable exactly along the declared tree.
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack = vec![module.id.as_str()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            return Err(format!("schema `{id}` is reachable twice (cycle)"));
        }
        if let Some(schema) = module.schema(id) {
            stack.extend(schema.children.iter().map(String::as_str));
        }
    }
    Ok(())
}

/// Serialize a module with the root schema first.
///
/// # Errors
///
/// Returns a YAML error when serialization fails.
pub fn serialize_schema_module(module: &SchemaModule) -> Result<String, serde_yaml::Error> {
    let mut schemas: Vec<SchemaProps> = Vec::with_capacity(module.schemas.len());
    if let Some(root) = module.root() {
        let mut root = root.clone();
        root.parent = Some(ROOT_FNAME.to_string());
        schemas.push(root);
    }
    schemas.extend(
        module
            .schemas
            .values()
            .filter(|schema| schema.id != module.id)
            .cloned(),
    );
    serde_yaml::to_string(&SchemaFile {
        version: module.version,
        imports: module.imports.clone(),
        schemas,
    })
}
