use crate::application::tooling::RemoteTool;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Longest tool name the model API accepts.
pub const MAX_TOOL_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("tool '{name}' is not in the catalog")]
    ToolNotFound { name: String },
}

/// A catalog entry with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server: String,
    pub original_name: String,
}

/// Tool definition in the shape the model expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Unified, collision-free tool namespace across all connected servers.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server's tools. Names are assigned deterministically in call order:
    /// the sanitized tool name, then `server__tool`, then a numeric suffix.
    pub fn register(&mut self, server: &str, tools: &[RemoteTool]) -> Vec<String> {
        let mut assigned = Vec::with_capacity(tools.len());
        for tool in tools {
            let name = self.unique_name(server, &tool.name);
            if name != tool.name {
                debug!(server, tool = %tool.name, catalog_name = %name, "Renamed tool in catalog");
            }
            let description = match tool.description.as_deref() {
                Some(text) if !text.trim().is_empty() => format!("[{server}] {text}"),
                _ => format!("[{server}] {}", tool.name),
            };
            self.index.insert(name.clone(), self.entries.len());
            self.entries.push(ToolDescriptor {
                name: name.clone(),
                description,
                input_schema: tool.input_schema.clone(),
                server: server.to_string(),
                original_name: tool.name.clone(),
            });
            assigned.push(name);
        }
        assigned
    }

    pub fn as_model_schema(&self) -> Vec<ToolSchema> {
        self.entries
            .iter()
            .map(|entry| ToolSchema {
                name: entry.name.clone(),
                description: entry.description.clone(),
                input_schema: entry.input_schema.clone(),
            })
            .collect()
    }

    /// Maps a catalog name back to `(server, original_name)`.
    pub fn resolve(&self, name: &str) -> Result<(&str, &str), CatalogError> {
        self.get(name)
            .map(|entry| (entry.server.as_str(), entry.original_name.as_str()))
            .ok_or_else(|| CatalogError::ToolNotFound {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&position| &self.entries[position])
    }

    pub fn tools_for<'a>(&'a self, server: &'a str) -> impl Iterator<Item = &'a ToolDescriptor> + 'a {
        self.entries.iter().filter(move |entry| entry.server == server)
    }

    pub fn entries(&self) -> &[ToolDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unique_name(&self, server: &str, original: &str) -> String {
        let plain = sanitize(original);
        if !self.index.contains_key(&plain) {
            return plain;
        }
        let qualified = sanitize(&format!("{server}__{original}"));
        if !self.index.contains_key(&qualified) {
            return qualified;
        }
        let mut counter = 2usize;
        loop {
            let suffix = format!("_{counter}");
            let base: String = qualified
                .chars()
                .take(MAX_TOOL_NAME_LEN - suffix.len())
                .collect();
            let candidate = format!("{base}{suffix}");
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Restricts a name to `[A-Za-z0-9_-]` and the model's length limit.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_TOOL_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        "tool".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn tools(names: &[&str]) -> Vec<RemoteTool> {
        names
            .iter()
            .map(|name| RemoteTool::new(*name, format!("does {name}")))
            .collect()
    }

    #[test]
    fn unique_names_keep_original_name() {
        let mut catalog = ToolCatalog::new();
        catalog.register("taylor", &tools(&["get_song"]));
        assert_eq!(catalog.resolve("get_song"), Ok(("taylor", "get_song")));
        assert_eq!(catalog.entries()[0].description, "[taylor] does get_song");
    }

    #[test]
    fn colliding_names_are_qualified_by_server() {
        let mut catalog = ToolCatalog::new();
        catalog.register("alpha", &tools(&["lookup"]));
        let assigned = catalog.register("beta", &tools(&["lookup"]));
        assert_eq!(assigned, vec!["beta__lookup".to_string()]);
        assert_eq!(catalog.resolve("lookup"), Ok(("alpha", "lookup")));
        assert_eq!(catalog.resolve("beta__lookup"), Ok(("beta", "lookup")));
    }

    #[test]
    fn qualified_collisions_get_numeric_suffix() {
        let mut catalog = ToolCatalog::new();
        catalog.register("x", &tools(&["c"]));
        catalog.register("x", &tools(&["c"]));
        let assigned = catalog.register("x", &tools(&["c"]));
        assert_eq!(assigned, vec!["x__c_2".to_string()]);
        assert_eq!(catalog.resolve("x__c_2"), Ok(("x", "c")));
    }

    #[test]
    fn dots_and_spaces_are_replaced() {
        let mut catalog = ToolCatalog::new();
        let assigned = catalog.register("fs", &tools(&["files.read all"]));
        assert_eq!(assigned, vec!["files_read_all".to_string()]);
        assert_eq!(catalog.resolve("files_read_all"), Ok(("fs", "files.read all")));
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "t".repeat(100);
        assert_eq!(sanitize(&long).len(), MAX_TOOL_NAME_LEN);
        let mut catalog = ToolCatalog::new();
        catalog.register("a", &tools(&[long.as_str()]));
        let assigned = catalog.register("a", &tools(&[long.as_str()]));
        assert_eq!(assigned[0].len(), MAX_TOOL_NAME_LEN);
        let third = catalog.register("a", &tools(&[long.as_str()]));
        assert!(third[0].ends_with("_2"));
        assert_eq!(third[0].len(), MAX_TOOL_NAME_LEN);
    }

    #[test]
    fn names_are_unique_across_many_collisions() {
        let mut catalog = ToolCatalog::new();
        for server in ["a", "b", "c", "a", "b"] {
            catalog.register(server, &tools(&["search", "a__search", "fetch"]));
        }
        let names: HashSet<_> = catalog.as_model_schema().into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), catalog.len());
        for entry in catalog.entries() {
            let (server, original) = catalog.resolve(&entry.name).expect("resolves");
            assert_eq!(server, entry.server);
            assert_eq!(original, entry.original_name);
        }
    }

    #[test]
    fn resolve_unknown_name_fails() {
        let catalog = ToolCatalog::new();
        assert_eq!(
            catalog.resolve("missing"),
            Err(CatalogError::ToolNotFound {
                name: "missing".into()
            })
        );
    }

    #[test]
    fn schema_keeps_registration_order_and_input_schema() {
        let mut catalog = ToolCatalog::new();
        let schema = json!({ "type": "object", "properties": { "q": { "type": "string" } } });
        catalog.register("s1", &[RemoteTool::new("one", "first").with_schema(schema.clone())]);
        catalog.register("s2", &tools(&["two"]));
        let model_tools = catalog.as_model_schema();
        assert_eq!(model_tools[0].name, "one");
        assert_eq!(model_tools[0].input_schema, schema);
        assert_eq!(model_tools[1].name, "two");
        assert_eq!(catalog.tools_for("s2").count(), 1);
    }
}
