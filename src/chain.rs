//! Prompt → model → parser pipeline.

use crate::model::{ChatModel, ModelError, TextStream};
use crate::parser::StrOutputParser;
use crate::prompt::{ChatPromptTemplate, PromptError};
use futures::{future, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type ChainInput = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Clone)]
pub struct Chain {
    prompt: ChatPromptTemplate,
    model: Arc<dyn ChatModel>,
    parser: StrOutputParser,
}

impl Chain {
    pub fn new(prompt: ChatPromptTemplate, model: Arc<dyn ChatModel>, parser: StrOutputParser) -> Self {
        Self {
            prompt,
            model,
            parser,
        }
    }

    pub fn prompt(&self) -> &ChatPromptTemplate {
        &self.prompt
    }

    pub fn parser(&self) -> &StrOutputParser {
        &self.parser
    }

    pub async fn invoke(&self, input: &ChainInput) -> Result<String, ChainError> {
        let messages = self.prompt.format(input)?;
        tracing::debug!(model = self.model.name(), "Invoking chain");
        let text = self.model.generate(messages).await?;
        Ok(self.parser.parse(text))
    }

    /// Runs every input concurrently. Fails as a whole if any input fails.
    pub async fn batch(&self, inputs: &[ChainInput]) -> Result<Vec<String>, ChainError> {
        // Validate all inputs before any model call is made.
        let prompts = inputs
            .iter()
            .map(|input| self.prompt.format(input))
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = future::try_join_all(prompts.into_iter().map(|messages| async move {
            let text = self.model.generate(messages).await?;
            Ok::<_, ModelError>(self.parser.parse(text))
        }))
        .await?;

        Ok(outputs)
    }

    /// Streams parsed chunks as the model produces them.
    pub async fn stream(&self, input: &ChainInput) -> Result<TextStream, ChainError> {
        let messages = self.prompt.format(input)?;
        tracing::debug!(model = self.model.name(), "Streaming chain");
        let parser = self.parser;
        let stream = self.model.stream(messages).await?;
        Ok(Box::pin(
            stream.map(move |chunk| chunk.map(|text| parser.parse(text))),
        ))
    }
}
