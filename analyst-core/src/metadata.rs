//! Metadata planning - a one-shot discovery script run before the solution
//!
//! Whatever goes wrong here, the run continues with an empty list.

use crate::engine::{ExecutionEngine, ExecutionRequest};
use crate::extract::extract;
use crate::manifest::LibraryManifest;
use crate::oracle::{Oracle, OraclePurpose};
use crate::prompts::PromptSet;
use crate::task::AnalysisTask;
use analyst_oracle::{ChatMessage, LlmProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

pub const METADATA_BINDING: &str = "metadata_list";
pub const NO_METADATA: &str = "No metadata required.";

/// One discovered data source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    #[serde(default, deserialize_with = "lenient_text")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub metadata: String,
}

// Discovery scripts often bind dicts or numbers where text is expected.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// `Source i:` blocks for the solution prompt
pub fn format_metadata_list(items: &[MetadataItem]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        let url = if item.url.is_empty() { "N/A" } else { &item.url };
        out.push_str(&format!(
            "Source {}:\nURL: {}\nMetadata:\n{}\n\n",
            i + 1,
            url,
            item.metadata
        ));
    }
    out.trim().to_string()
}

pub(crate) fn metadata_messages(
    prompts: &PromptSet,
    manifest: &LibraryManifest,
    task: &AnalysisTask,
    attachment_summary: &str,
) -> Vec<ChatMessage> {
    let system = format!(
        "{}\n\nIMPORTANT:\nYou are restricted to using libraries only from the below list \
         of allowed packages present in the environment:\n{}",
        prompts.metadata,
        manifest.render()
    );
    let user = format!(
        "The data-analysis task is:\n{}\n\nAttached files (if any):\n{}",
        task, attachment_summary
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub struct MetadataPlanner<'a> {
    pub prompts: &'a PromptSet,
    pub manifest: &'a LibraryManifest,
    pub revalidate: bool,
}

impl MetadataPlanner<'_> {
    /// Ask for a discovery script, run it once, and read `metadata_list`.
    pub async fn plan<P: LlmProvider, E: ExecutionEngine>(
        &self,
        oracle: &Oracle<'_, P>,
        engine: &E,
        task: &AnalysisTask,
        attachment_summary: &str,
    ) -> Vec<MetadataItem> {
        let messages = metadata_messages(self.prompts, self.manifest, task, attachment_summary);
        let raw = match oracle.ask(OraclePurpose::Metadata, messages).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "metadata generation failed, continuing without metadata");
                return Vec::new();
            }
        };

        let code = extract(oracle, &self.prompts.validate, &raw, self.revalidate).await;
        let request = ExecutionRequest::capturing([METADATA_BINDING]);
        let mut bindings = match engine.execute(&code, &request).await {
            Ok(bindings) => bindings,
            Err(e) => {
                warn!(error = %e, "metadata script failed, continuing without metadata");
                return Vec::new();
            }
        };

        let Some(value) = bindings.remove(METADATA_BINDING) else {
            warn!("metadata script did not bind {}", METADATA_BINDING);
            return Vec::new();
        };
        match serde_json::from_value::<Vec<MetadataItem>>(value) {
            Ok(items) => {
                info!(sources = items.len(), "metadata collected");
                items
            }
            Err(e) => {
                warn!(error = %e, "{} has the wrong shape, ignoring it", METADATA_BINDING);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Bindings, ExecutionError, ScriptedEngine};
    use analyst_oracle::{ProviderError, ScriptedProvider};
    use serde_json::json;

    fn planner<'a>(prompts: &'a PromptSet, manifest: &'a LibraryManifest) -> MetadataPlanner<'a> {
        MetadataPlanner {
            prompts,
            manifest,
            revalidate: false,
        }
    }

    fn task() -> AnalysisTask {
        AnalysisTask::new("Which film grossed the most?").unwrap()
    }

    #[test]
    fn test_format_metadata_list() {
        let items = vec![
            MetadataItem {
                url: "https://example.org/films".into(),
                metadata: "columns: title, gross".into(),
            },
            MetadataItem {
                url: String::new(),
                metadata: "shape (3, 1)".into(),
            },
        ];
        assert_eq!(
            format_metadata_list(&items),
            "Source 1:\nURL: https://example.org/films\nMetadata:\ncolumns: title, gross\n\n\
             Source 2:\nURL: N/A\nMetadata:\nshape (3, 1)"
        );
        assert_eq!(format_metadata_list(&[]), "");
    }

    #[test]
    fn test_item_tolerates_missing_and_structured_fields() {
        let items: Vec<MetadataItem> =
            serde_json::from_value(json!([{"metadata": {"rows": 3}}, {"url": "a.csv"}])).unwrap();
        assert_eq!(items[0].url, "");
        assert_eq!(items[0].metadata, r#"{"rows":3}"#);
        assert_eq!(items[1].metadata, "");
    }

    #[test]
    fn test_messages_carry_manifest_and_task() {
        let prompts = PromptSet::default();
        let manifest = LibraryManifest::from_names(["pandas", "requests"]);
        let messages = metadata_messages(&prompts, &manifest, &task(), "No additional files provided.");

        assert!(messages[0].content.starts_with(&prompts.metadata));
        assert!(messages[0].content.ends_with("environment:\n- pandas\n- requests"));
        assert_eq!(
            messages[1].content,
            "The data-analysis task is:\nWhich film grossed the most?\n\n\
             Attached files (if any):\nNo additional files provided."
        );
    }

    #[tokio::test]
    async fn test_plan_reads_metadata_list() {
        let prompts = PromptSet::default();
        let manifest = LibraryManifest::default();
        let provider = ScriptedProvider::from_replies(["```python\nmetadata_list = []\n```"]);
        let oracle = Oracle::new(&provider);
        let engine = ScriptedEngine::new();
        let mut bindings = Bindings::new();
        bindings.insert(
            METADATA_BINDING.into(),
            json!([{"url": "https://example.org", "metadata": "one table"}]),
        );
        engine.push_bindings(bindings);

        let items = planner(&prompts, &manifest)
            .plan(&oracle, &engine, &task(), "")
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(engine.executed(), vec!["metadata_list = []"]);
    }

    #[tokio::test]
    async fn test_plan_absorbs_every_failure() {
        let prompts = PromptSet::default();
        let manifest = LibraryManifest::default();

        // oracle failure
        let provider = ScriptedProvider::new();
        provider.push_error(ProviderError::Network("down".into()));
        let oracle = Oracle::new(&provider);
        let engine = ScriptedEngine::new();
        assert!(planner(&prompts, &manifest).plan(&oracle, &engine, &task(), "").await.is_empty());
        assert_eq!(engine.execution_count(), 0);

        // execution failure
        let provider = ScriptedProvider::from_replies(["boom()"]);
        let oracle = Oracle::new(&provider);
        engine.push_error(ExecutionError::Raised {
            message: "NameError: name 'boom' is not defined".into(),
            traceback: None,
        });
        assert!(planner(&prompts, &manifest).plan(&oracle, &engine, &task(), "").await.is_empty());

        // wrong shape
        let provider = ScriptedProvider::from_replies(["metadata_list = 3"]);
        let oracle = Oracle::new(&provider);
        let mut bindings = Bindings::new();
        bindings.insert(METADATA_BINDING.into(), json!(3));
        engine.push_bindings(bindings);
        assert!(planner(&prompts, &manifest).plan(&oracle, &engine, &task(), "").await.is_empty());
    }
}
