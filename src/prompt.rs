//! Instruction text and chat prompt templating.

use crate::model::{Message, Role};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Instruction sent with every image. It also serves as the system message
/// of the chain prompt.
pub const FRESHNESS_TEMPLATE: &str = r#"You are a knowledgeable AI assistant. Analyze the uploaded image of one or more eatable items or products for their freshness and provide a customer-friendly report using the following format:

For each item detected in the image, provide the following details:
Item Number:"Give the number as you go on detecting elements"
Item Name:"Name of the eatable item"
Direction: "Position/direction of the item in the image, e.g., 'top-left,' 'center,' 'bottom-right,' etc."
Freshness Index: "FI (Out of 10)",Status: "Fresh/Moderately Fresh/Overripe/Stale/etc."
Visual Color: "Brief description of the item’s color and how it indicates its freshness"
Surface Texture: "Brief description of the surface condition and texture"
Firmness Level: "Brief description of how firm or soft the item likely is, if applicable"
Packaging Condition: "Description of packaging condition or surface elements, if applicable"
Estimated Shelf Life: "Estimated shelf life based on freshness assessment"
 Recommendation: "Practical recommendation like 'ready to eat,' 'consume soon,' 'best for baking,' or 'not suitable for consumption'"

If there are multiple eatables in the image, list each item separately using the above format.also remember do not use any other formate like for the response,strictly adhere to the the one mentioned above else the world might collapse,do not use any characters like '\' or '*'
also very important if the image uploaded is not a eatable item or product, then please mention that the the analysis of the respective field mentioned above is not possible dont leave any field empty.
"#;

#[derive(Debug, Error, PartialEq)]
pub enum PromptError {
    #[error("Missing input variable: {0}")]
    MissingVariable(String),

    #[error("Unbalanced brace in template at byte {0}")]
    UnbalancedBrace(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A single message template with `{name}` placeholders. `{{` and `}}`
/// render as literal braces.
#[derive(Debug, Clone)]
struct MessageTemplate {
    role: Role,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    fn parse(role: Role, template: &str) -> Result<Self, PromptError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, '{')) | None => return Err(PromptError::UnbalancedBrace(pos)),
                            Some((_, c)) => name.push(c),
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(name.trim().to_string()));
                }
                '}' => return Err(PromptError::UnbalancedBrace(pos)),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { role, segments })
    }

    fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    fn render(&self, values: &HashMap<String, String>) -> Result<Message, PromptError> {
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Variable(name) => text.push_str(
                    values
                        .get(name)
                        .ok_or_else(|| PromptError::MissingVariable(name.clone()))?,
                ),
            }
        }
        Ok(Message::new(self.role, vec![crate::model::Part::Text(text)]))
    }
}

/// Ordered list of role-tagged message templates.
#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    messages: Vec<MessageTemplate>,
}

impl ChatPromptTemplate {
    pub fn from_messages(messages: &[(Role, &str)]) -> Result<Self, PromptError> {
        let messages = messages
            .iter()
            .map(|(role, template)| MessageTemplate::parse(*role, template))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { messages })
    }

    /// The prompt used by the chain routes: the freshness instructions as
    /// the system message followed by the caller's `text`.
    pub fn freshness() -> Result<Self, PromptError> {
        Self::from_messages(&[(Role::System, FRESHNESS_TEMPLATE), (Role::User, "{text}")])
    }

    /// Sorted, de-duplicated placeholder names.
    pub fn input_variables(&self) -> Vec<String> {
        self.messages
            .iter()
            .flat_map(MessageTemplate::variables)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn format(&self, values: &HashMap<String, String>) -> Result<Vec<Message>, PromptError> {
        self.messages.iter().map(|m| m.render(values)).collect()
    }
}
