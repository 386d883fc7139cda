//! Solution synthesis - the first full analysis script

use crate::extract::{extract, CodeText, Provenance};
use crate::manifest::LibraryManifest;
use crate::metadata::{format_metadata_list, MetadataItem, NO_METADATA};
use crate::oracle::{Oracle, OraclePurpose};
use crate::prompts::PromptSet;
use crate::task::AnalysisTask;
use analyst_error::{Error, Result};
use analyst_oracle::{ChatMessage, LlmProvider};
use tracing::info;

pub const SOLUTION_SYSTEM: &str = "You are a data analysis expert.";

/// Build the user turn: task, metadata, attachments, then the rules the
/// script has to follow.
pub fn solution_prompt(
    task: &AnalysisTask,
    metadata: &[MetadataItem],
    attachment_summary: &str,
    manifest: &LibraryManifest,
) -> String {
    let metadata_text = if metadata.is_empty() {
        NO_METADATA.to_string()
    } else {
        format_metadata_list(metadata)
    };

    format!(
        "You are a data analysis expert. Write Python code that solves the data analysis task below.

## Task:
{task}

## Metadata:
{metadata_text}

## Attachments:
{attachment_summary}

(The metadata describes candidate data sources and their structure. Use only what is relevant.)

---

## Instructions:

- Import **only** the following Python libraries:
{libraries}
- Do NOT import anything that is not listed above.
- The script must do its work when executed as-is; nothing may depend on a caller invoking a function afterwards.
- By the end, the script must bind two variables:
    - `result`: the final answer, JSON-serializable, shaped as the task asks.
    - `error_list`: a list of the error messages collected while running.
- Convert NumPy and Pandas values (np.int64, np.float64, pd.Timestamp, ...) to native Python types (`int`, `float`, `str`) before putting them in `result`.
- Open attachments using the file paths exactly as listed under Attachments.
- Every function you define must also be called in the script.
- Put each question, or each part of the answer, in its own `try/except` block.
    - On an exception, append a message to `error_list` and carry on.
- Clean scraped data before using it; strip or ignore `<sup>` footnote tags such as Wikipedia references.
- When matplotlib is used, start with:
    ```python
    import matplotlib
    matplotlib.use('Agg')
    ```

---

## Output Format:

- Reply with a single Python code block and nothing else.
- No explanations and no comments, only code.
- Keep the code minimal, correct and ready for `exec()`.
",
        task = task,
        metadata_text = metadata_text,
        attachment_summary = attachment_summary,
        libraries = manifest.render(),
    )
}

pub struct Synthesizer<'a> {
    pub prompts: &'a PromptSet,
    pub manifest: &'a LibraryManifest,
    pub revalidate: bool,
}

impl Synthesizer<'_> {
    /// Ask for the solution script. Without a first script there is nothing
    /// to repair, so an oracle failure here fails the run.
    pub async fn synthesize<P: LlmProvider>(
        &self,
        oracle: &Oracle<'_, P>,
        task: &AnalysisTask,
        metadata: &[MetadataItem],
        attachment_summary: &str,
    ) -> Result<CodeText> {
        let messages = vec![
            ChatMessage::system(SOLUTION_SYSTEM),
            ChatMessage::user(solution_prompt(task, metadata, attachment_summary, self.manifest)),
        ];
        let raw = oracle
            .ask(OraclePurpose::Solution, messages)
            .await
            .map_err(|e| {
                Error::inference_failed(format!("solution generation failed: {}", e))
                    .with_operation("synthesize::solution")
                    .set_source(e)
            })?;

        let source = extract(oracle, &self.prompts.validate, &raw, self.revalidate).await;
        info!(chars = source.len(), "solution code generated");
        Ok(CodeText::new(source, Provenance::Solution, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_error::ErrorKind;
    use analyst_oracle::{ProviderError, ScriptedProvider};

    fn task() -> AnalysisTask {
        AnalysisTask::new("Compute the mean of column x").unwrap()
    }

    #[test]
    fn test_prompt_without_metadata() {
        let manifest = LibraryManifest::from_names(["pandas"]);
        let prompt = solution_prompt(&task(), &[], "No additional files provided.", &manifest);

        assert!(prompt.contains("## Task:\nCompute the mean of column x\n"));
        assert!(prompt.contains("## Metadata:\nNo metadata required.\n"));
        assert!(prompt.contains("## Attachments:\nNo additional files provided.\n"));
        assert!(prompt.contains("libraries:\n- pandas\n"));
        assert!(prompt.contains("`error_list`"));
        assert!(prompt.contains("matplotlib.use('Agg')"));
    }

    #[test]
    fn test_prompt_with_metadata() {
        let metadata = vec![MetadataItem {
            url: "data.csv".into(),
            metadata: "x: int".into(),
        }];
        let prompt = solution_prompt(&task(), &metadata, "", &LibraryManifest::default());
        assert!(prompt.contains("## Metadata:\nSource 1:\nURL: data.csv\nMetadata:\nx: int\n"));
    }

    #[tokio::test]
    async fn test_synthesize_extracts_code() {
        let prompts = PromptSet::default();
        let manifest = LibraryManifest::default();
        let provider = ScriptedProvider::from_replies(["```python\nresult = 2.0\nerror_list = []\n```"]);
        let oracle = Oracle::new(&provider);
        let synthesizer = Synthesizer {
            prompts: &prompts,
            manifest: &manifest,
            revalidate: false,
        };

        let code = synthesizer.synthesize(&oracle, &task(), &[], "").await.unwrap();
        assert_eq!(code.source, "result = 2.0\nerror_list = []");
        assert_eq!(code.provenance, Provenance::Solution);
        assert_eq!(code.attempt, 1);
        assert_eq!(provider.conversations()[0][0].content, SOLUTION_SYSTEM);
    }

    #[tokio::test]
    async fn test_oracle_failure_is_fatal() {
        let prompts = PromptSet::default();
        let manifest = LibraryManifest::default();
        let provider = ScriptedProvider::new();
        provider.push_error(ProviderError::Api {
            status: 500,
            message: "overloaded".into(),
        });
        let oracle = Oracle::new(&provider);
        let synthesizer = Synthesizer {
            prompts: &prompts,
            manifest: &manifest,
            revalidate: true,
        };

        let err = synthesizer.synthesize(&oracle, &task(), &[], "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
        assert_eq!(provider.call_count(), 1);
    }
}
