use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::traits::LlmClient;

/// LLM client that replays canned completions in order.
///
/// Once the script runs out the last completion is repeated. A scripted
/// entry of `Err(..)` makes that call fail.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    last: Mutex<Option<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn from_results(results: impl IntoIterator<Item = std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with the given message.
    pub fn failing(message: &str) -> Self {
        Self::from_results([Err(message.to_string())])
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt);
            let next = self.script.lock().unwrap().pop_front();
            let step = match next {
                Some(step) => {
                    *self.last.lock().unwrap() = Some(step.clone());
                    step
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err("script is empty".to_string())),
            };
            step.map_err(SwitchyardError::Llm)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_then_repeats() {
        let llm = ScriptedLlm::new(["a", "b"]);
        assert_eq!(llm.complete("1".into()).await.unwrap(), "a");
        assert_eq!(llm.complete("2".into()).await.unwrap(), "b");
        assert_eq!(llm.complete("3".into()).await.unwrap(), "b");
        assert_eq!(llm.prompts(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_failing() {
        let llm = ScriptedLlm::failing("quota exceeded");
        let err = llm.complete("x".into()).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(llm.complete("y".into()).await.is_err());
    }
}
