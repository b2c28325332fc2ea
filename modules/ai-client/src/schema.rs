use schemars::JsonSchema;
use serde::de::DeserializeOwned;

/// Types that can be extracted from an LLM response as strict JSON.
/// Auto-implemented for anything deriving `JsonSchema` + `Deserialize`.
pub trait StructuredOutput: DeserializeOwned {
    fn json_schema() -> serde_json::Value;
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {
    fn json_schema() -> serde_json::Value {
        let settings = schemars::gen::SchemaSettings::draft07().with(|s| {
            s.inline_subschemas = true;
        });
        let schema = settings.into_generator().into_root_schema_for::<T>();
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}
