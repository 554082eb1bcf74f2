//! Parse and merge pack YAML documents into typed configs.
//!
//! Documents are merged before deserializing: mappings merge recursively,
//! sequences append in document order and for scalar collisions the first
//! non-empty value wins.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::error::{ConfigError, Result};
use crate::types::{AgentsConfig, AssetSource, ModelsConfig, ToolsConfig};

/// Deep-merge `src` into `dst`.
pub fn merge_yaml(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Mapping(d), Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (Value::Sequence(d), Value::Sequence(s)) => d.extend(s),
        (d, s) => {
            if is_empty(d) {
                *d = s;
            }
        }
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        Value::Mapping(m) => m.is_empty(),
        Value::Tagged(_) => false,
    }
}

/// Merge raw YAML documents. A single blob may hold several `---` documents.
pub fn merge_documents<B: AsRef<[u8]>>(docs: &[B]) -> Result<Value> {
    let mut merged = Value::Null;
    for doc in docs {
        let text = std::str::from_utf8(doc.as_ref())
            .map_err(|e| ConfigError::invalid(format!("config is not UTF-8: {e}")))?;
        for de in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(de)?;
            merge_yaml(&mut merged, value);
        }
    }
    Ok(merged)
}

fn load<T: DeserializeOwned + Default, B: AsRef<[u8]>>(docs: &[B]) -> Result<T> {
    let merged = merge_documents(docs)?;
    if merged.is_null() {
        return Ok(T::default());
    }
    Ok(serde_yaml::from_value(merged)?)
}

/// Merge and validate agent pack documents.
pub fn load_agents_data<B: AsRef<[u8]>>(docs: &[B]) -> Result<AgentsConfig> {
    let mut config: AgentsConfig = load(docs)?;
    fill_agents(&mut config);
    validate_agents(&config)?;
    Ok(config)
}

/// Merge and validate toolkit documents.
pub fn load_tools_data<B: AsRef<[u8]>>(docs: &[B]) -> Result<ToolsConfig> {
    let mut config: ToolsConfig = load(docs)?;
    fill_tools(&mut config);
    for tool in &config.tools {
        if tool.tool_type.is_none() {
            return Err(ConfigError::invalid(format!(
                "tool {}:{} has no type",
                config.kit, tool.name
            )));
        }
    }
    Ok(config)
}

/// Merge and validate model set documents.
pub fn load_models_data<B: AsRef<[u8]>>(docs: &[B]) -> Result<ModelsConfig> {
    let mut config: ModelsConfig = load(docs)?;
    fill_models(&mut config, "", "", "");
    validate_models(&config)?;
    Ok(config)
}

fn inherit(field: &mut String, parent: &str) {
    if field.is_empty() {
        *field = parent.to_string();
    }
}

fn fill_agents(config: &mut AgentsConfig) {
    for tool in &mut config.tools {
        inherit(&mut tool.kit, &config.name);
        inherit(&mut tool.provider, &config.provider);
        inherit(&mut tool.base_url, &config.base_url);
        inherit(&mut tool.api_key, &config.api_key);
    }
    for set in &mut config.models {
        fill_models(set, &config.provider, &config.base_url, &config.api_key);
    }
}

fn fill_tools(config: &mut ToolsConfig) {
    for tool in &mut config.tools {
        if tool.tool_type.is_none() {
            tool.tool_type = config.tool_type;
        }
        inherit(&mut tool.kit, &config.kit);
        inherit(&mut tool.provider, &config.provider);
        inherit(&mut tool.base_url, &config.base_url);
        inherit(&mut tool.api_key, &config.api_key);
    }
}

fn fill_models(set: &mut ModelsConfig, provider: &str, base_url: &str, api_key: &str) {
    inherit(&mut set.provider, provider);
    inherit(&mut set.base_url, base_url);
    inherit(&mut set.api_key, api_key);
    for model in set.models.values_mut() {
        inherit(&mut model.provider, &set.provider);
        inherit(&mut model.base_url, &set.base_url);
        inherit(&mut model.api_key, &set.api_key);
    }
}

fn validate_models(set: &ModelsConfig) -> Result<()> {
    for (level, model) in &set.models {
        if model.provider.is_empty() {
            return Err(ConfigError::invalid(format!(
                "model {}/{level} has no provider",
                set.set
            )));
        }
    }
    Ok(())
}

fn validate_agents(config: &AgentsConfig) -> Result<()> {
    for set in &config.models {
        validate_models(set)?;
    }
    for tool in &config.tools {
        if tool.tool_type.is_none() {
            return Err(ConfigError::invalid(format!(
                "tool {}:{} has no type",
                tool.kit, tool.name
            )));
        }
    }
    Ok(())
}

/// Normalize agent names to lower-case `pack[/sub]`.
///
/// Names not already under the pack are treated as sub-agents.
pub fn normalize_agent_names(config: &mut AgentsConfig, pack: &str) {
    let pack = pack.to_lowercase();
    if config.name.is_empty() {
        config.name = pack.clone();
    }
    for agent in &mut config.agents {
        let name = agent.name.trim().trim_start_matches('@').to_lowercase();
        agent.name = if name.is_empty() || name == pack {
            pack.clone()
        } else if let Some(sub) = name.strip_prefix(&format!("{pack}/")) {
            if sub == pack {
                pack.clone()
            } else {
                name
            }
        } else {
            format!("{pack}/{name}")
        };
    }
    for tool in &mut config.tools {
        if tool.kit.is_empty() {
            tool.kit = pack.clone();
        }
    }
}

/// Resolve an instruction, message or context reference.
///
/// `file:<path>`, `resource:<name>` and `asset:<name>` are read through the
/// config's asset store relative to its base directory; anything else is
/// returned as a literal.
pub async fn resolve_content(source: Option<&AssetSource>, content: &str) -> Result<String> {
    let path = ["file:", "resource:", "asset:"]
        .iter()
        .find_map(|prefix| content.strip_prefix(prefix));
    let Some(path) = path else {
        return Ok(content.to_string());
    };
    let source = source.ok_or_else(|| {
        ConfigError::not_found(format!("no asset store to resolve {content}"))
    })?;
    let name = source.store.resolve(&source.base_dir, path.trim());
    let data = source.store.read_file(&name).await?;
    String::from_utf8(data).map_err(|e| ConfigError::invalid(format!("{name} is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = r#"
pack: ask
model: default/L1
max_turns: 5
agents:
  - name: ask
    instruction: "You answer questions."
tools:
  - name: upcase
    type: func
"#;

    const B: &str = r#"
pack: other
max_turns: 9
provider: openai
agents:
  - name: ask/sub
    model: L2
"#;

    const C: &str = r#"
environment:
  k: v
agents:
  - name: third
"#;

    #[test]
    fn test_merge_first_non_empty_scalar_wins() {
        let cfg = load_agents_data(&[A, B]).unwrap();
        assert_eq!(cfg.name, "ask");
        assert_eq!(cfg.max_turns, 5);
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.agents.len(), 2);
    }

    #[test]
    fn test_merge_associative() {
        let all = load_agents_data(&[A, B, C]).unwrap();

        let ab = serde_yaml::to_string(&merge_documents(&[A, B]).unwrap()).unwrap();
        let left = load_agents_data(&[ab.as_str(), C]).unwrap();

        let bc = serde_yaml::to_string(&merge_documents(&[B, C]).unwrap()).unwrap();
        let right = load_agents_data(&[A, bc.as_str()]).unwrap();

        assert_eq!(all, left);
        assert_eq!(all, right);
        let names: Vec<_> = all.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["ask", "ask/sub", "third"]);
    }

    #[test]
    fn test_multi_document_blob() {
        let blob = format!("{A}\n---\n{C}");
        let cfg = load_agents_data(&[blob]).unwrap();
        assert_eq!(cfg.agents.len(), 2);
        assert_eq!(cfg.environment["k"], "v");
    }

    #[test]
    fn test_tools_inherit_from_pack() {
        let cfg = load_agents_data(&[A, B]).unwrap();
        assert_eq!(cfg.tools[0].kit, "ask");
        assert_eq!(cfg.tools[0].provider, "openai");
    }

    #[test]
    fn test_tool_type_required() {
        let err = load_tools_data(&["kit: x\ntools:\n  - name: a\n"]).unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::BadRequest);

        let ok = load_tools_data(&["kit: x\ntype: func\ntools:\n  - name: a\n"]).unwrap();
        assert_eq!(ok.tools[0].tool_type, Some(crate::types::ToolType::Func));
        assert_eq!(ok.tools[0].kit, "x");
    }

    #[test]
    fn test_model_provider_required_and_inherited() {
        let err = load_models_data(&["set: s\nmodels:\n  L1: {model: m}\n"]).unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::BadRequest);

        let ok = load_models_data(&[
            "set: s\nprovider: gemini\napi_key: gemini_api_key\nmodels:\n  L1: {model: m}\n",
        ])
        .unwrap();
        let model = ok.model("L1").unwrap();
        assert_eq!(model.provider, "gemini");
        assert_eq!(model.api_key, "gemini_api_key");
    }

    #[test]
    fn test_malformed_yaml() {
        let err = load_agents_data(&["agents: [unclosed"]).unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::BadRequest);
    }

    #[test]
    fn test_normalize_agent_names() {
        let mut cfg = load_agents_data(&[
            "agents:\n  - name: Ask\n  - name: Helper\n  - name: ask/ask\n  - name: ask/x\n",
        ])
        .unwrap();
        normalize_agent_names(&mut cfg, "ask");
        let names: Vec<_> = cfg.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["ask", "ask/helper", "ask", "ask/x"]);
        assert_eq!(cfg.name, "ask");
    }
}
