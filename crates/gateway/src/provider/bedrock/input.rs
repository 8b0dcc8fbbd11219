//! Request conversion for the AWS Bedrock Converse API.

use aws_sdk_bedrockruntime::{
    operation::{converse::ConverseInput, converse_stream::ConverseStreamInput},
    types::{
        AnyToolChoice, AutoToolChoice, ContentBlock, ConversationRole, InferenceConfiguration,
        Message as BedrockMessage, SpecificToolChoice, SystemContentBlock, Tool, ToolChoice as BedrockToolChoice,
        ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolSpecification, ToolUseBlock,
    },
};
use serde_json::Value;

use crate::messages::canonical::{
    ChatMessage, ChatParameters, ChatRequest, ChatRole, ContentBlock as CanonicalBlock, MessageContent, ToolCall,
    ToolChoice, ToolChoiceMode, ToolDefinition,
};

impl From<ChatRequest> for ConverseInput {
    fn from(request: ChatRequest) -> Self {
        let (model, system, messages, inference_config, tool_config) = convert_request(request);

        ConverseInput::builder()
            .model_id(model)
            .set_messages(Some(messages))
            .set_system(system)
            .set_inference_config(inference_config)
            .set_tool_config(tool_config)
            .build()
            .expect("ConverseInput builds from a populated model id")
    }
}

impl From<ChatRequest> for ConverseStreamInput {
    fn from(request: ChatRequest) -> Self {
        let (model, system, messages, inference_config, tool_config) = convert_request(request);

        ConverseStreamInput::builder()
            .model_id(model)
            .set_messages(Some(messages))
            .set_system(system)
            .set_inference_config(inference_config)
            .set_tool_config(tool_config)
            .build()
            .expect("ConverseStreamInput builds from a populated model id")
    }
}

type ConvertedRequest = (
    String,
    Option<Vec<SystemContentBlock>>,
    Vec<BedrockMessage>,
    Option<InferenceConfiguration>,
    Option<ToolConfiguration>,
);

fn convert_request(request: ChatRequest) -> ConvertedRequest {
    let params = request.params.unwrap_or_default();
    let model = request.model;

    let tool_config = match &params.tools {
        Some(tools) if !tools.is_empty() => convert_tools(tools.clone(), params.tool_choice.clone(), &model),
        _ => None,
    };

    let inference_config = build_inference_config(&params);
    let (system, messages) = convert_messages(request.messages);

    (model, system, messages, inference_config, tool_config)
}

fn build_inference_config(params: &ChatParameters) -> Option<InferenceConfiguration> {
    let mut builder = InferenceConfiguration::builder();
    let mut has_config = false;

    if let Some(max_tokens) = params.max_tokens {
        builder = builder.max_tokens(max_tokens as i32);
        has_config = true;
    }

    if let Some(temperature) = params.temperature {
        builder = builder.temperature(temperature);
        has_config = true;
    }

    if let Some(top_p) = params.top_p {
        builder = builder.top_p(top_p);
        has_config = true;
    }

    if let Some(stop) = params.stop_sequences.clone() {
        builder = builder.set_stop_sequences(Some(stop));
        has_config = true;
    }

    has_config.then(|| builder.build())
}

/// Convert canonical messages, grouping consecutive same-role turns into one
/// Bedrock message (Converse requires strict role alternation).
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<Vec<SystemContentBlock>>, Vec<BedrockMessage>) {
    let mut system_blocks = Vec::new();
    let mut conversation = Vec::new();

    let mut current_role: Option<ConversationRole> = None;
    let mut current_blocks: Vec<ContentBlock> = Vec::new();

    for message in messages {
        if matches!(message.role, ChatRole::System | ChatRole::Developer) {
            system_blocks.push(SystemContentBlock::Text(message.text_content().unwrap_or_default()));
            continue;
        }

        let (role, blocks) = message_to_blocks(message);

        if current_role.as_ref().is_some_and(|previous| *previous != role)
            && !current_blocks.is_empty()
            && let Some(previous_role) = current_role.take()
            && let Ok(grouped) = BedrockMessage::builder()
                .role(previous_role)
                .set_content(Some(std::mem::take(&mut current_blocks)))
                .build()
        {
            conversation.push(grouped);
        }

        current_blocks.extend(blocks);
        current_role = Some(role);
    }

    if let Some(role) = current_role
        && !current_blocks.is_empty()
        && let Ok(grouped) = BedrockMessage::builder()
            .role(role)
            .set_content(Some(current_blocks))
            .build()
    {
        conversation.push(grouped);
    }

    let system = if system_blocks.is_empty() { None } else { Some(system_blocks) };

    (system, conversation)
}

fn message_to_blocks(message: ChatMessage) -> (ConversationRole, Vec<ContentBlock>) {
    let role = match message.role {
        ChatRole::Assistant => ConversationRole::Assistant,
        _ => ConversationRole::User,
    };

    let mut blocks = Vec::new();

    if let Some(ref tool_call_id) = message.tool_call_id {
        let tool_call_id = tool_call_id.clone();
        let output = message.text_content().unwrap_or_default();

        if let Ok(result) = ToolResultBlock::builder()
            .tool_use_id(tool_call_id)
            .content(ToolResultContentBlock::Text(output))
            .build()
        {
            blocks.push(ContentBlock::ToolResult(result));
        }

        return (role, blocks);
    }

    match message.content {
        Some(MessageContent::Text(text)) => {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text(text));
            }
        }
        Some(MessageContent::Blocks(content_blocks)) => {
            for block in content_blocks {
                match block {
                    CanonicalBlock::Text { text } => blocks.push(ContentBlock::Text(text)),
                    CanonicalBlock::Refusal { refusal } => blocks.push(ContentBlock::Text(refusal)),
                    other => {
                        log::debug!("Dropping unsupported content block for Bedrock: {other:?}");
                    }
                }
            }
        }
        None => {}
    }

    for call in message.tool_calls.into_iter().flatten() {
        if let Some(block) = tool_call_to_block(call) {
            blocks.push(block);
        }
    }

    (role, blocks)
}

fn tool_call_to_block(call: ToolCall) -> Option<ContentBlock> {
    let ToolCall { id, function, .. } = call;

    let args_doc = match serde_json::from_str::<Value>(&function.arguments) {
        Ok(value) => normalize_tool_input(value_to_document(value)),
        Err(e) => {
            log::debug!(
                "Bedrock tool_use arguments fall back to string: id={id} name={} error={e}",
                function.name
            );
            normalize_tool_input(aws_smithy_types::Document::String(function.arguments))
        }
    };

    ToolUseBlock::builder()
        .tool_use_id(id)
        .name(function.name)
        .input(args_doc)
        .build()
        .map(ContentBlock::ToolUse)
        .ok()
}

fn convert_tools(
    tools: Vec<ToolDefinition>,
    tool_choice: Option<ToolChoice>,
    model_id: &str,
) -> Option<ToolConfiguration> {
    let bedrock_tools: Vec<Tool> = tools
        .into_iter()
        .filter_map(|tool| {
            let schema = ToolInputSchema::Json(value_to_document(tool.function.parameters));

            ToolSpecification::builder()
                .name(tool.function.name)
                .description(tool.function.description)
                .input_schema(schema)
                .build()
                .map(Tool::ToolSpec)
                .ok()
        })
        .collect();

    if bedrock_tools.is_empty() {
        return None;
    }

    let mut builder = ToolConfiguration::builder().set_tools(Some(bedrock_tools));

    if let Some(choice) = tool_choice {
        let family = ModelFamily::from_model_id(model_id);
        if let Some(converted) = family.convert_tool_choice(choice) {
            builder = builder.tool_choice(converted);
        }
    }

    builder.build().ok()
}

/// Model family capabilities for the Converse API; tool-choice support
/// varies by family.
#[derive(Debug)]
enum ModelFamily {
    Anthropic,
    AmazonNova,
    AmazonTitan,
    Cohere,
    MetaLlama,
    Mistral,
    Unknown,
}

impl ModelFamily {
    fn from_model_id(model_id: &str) -> Self {
        let bare = model_id
            .split_once('.')
            .filter(|(prefix, _)| prefix.len() == 2)
            .map(|(_, rest)| rest)
            .unwrap_or(model_id);

        if bare.starts_with("anthropic.") {
            ModelFamily::Anthropic
        } else if bare.starts_with("amazon.nova") {
            ModelFamily::AmazonNova
        } else if bare.starts_with("amazon.titan") {
            ModelFamily::AmazonTitan
        } else if bare.starts_with("cohere.") {
            ModelFamily::Cohere
        } else if bare.starts_with("meta.") {
            ModelFamily::MetaLlama
        } else if bare.starts_with("mistral.") {
            ModelFamily::Mistral
        } else {
            ModelFamily::Unknown
        }
    }

    fn supports_any(&self) -> bool {
        matches!(self, ModelFamily::Anthropic | ModelFamily::AmazonNova | ModelFamily::MetaLlama)
    }

    fn supports_specific(&self) -> bool {
        !matches!(self, ModelFamily::AmazonTitan | ModelFamily::Unknown)
    }

    fn convert_tool_choice(&self, choice: ToolChoice) -> Option<BedrockToolChoice> {
        match choice {
            ToolChoice::Mode(ToolChoiceMode::None) => None,
            ToolChoice::Mode(ToolChoiceMode::Auto) => {
                Some(BedrockToolChoice::Auto(AutoToolChoice::builder().build()))
            }
            ToolChoice::Mode(ToolChoiceMode::Required) => {
                if self.supports_any() {
                    Some(BedrockToolChoice::Any(AnyToolChoice::builder().build()))
                } else {
                    Some(BedrockToolChoice::Auto(AutoToolChoice::builder().build()))
                }
            }
            ToolChoice::Function { name } => {
                if self.supports_specific() {
                    SpecificToolChoice::builder()
                        .name(name)
                        .build()
                        .ok()
                        .map(BedrockToolChoice::Tool)
                } else {
                    Some(BedrockToolChoice::Auto(AutoToolChoice::builder().build()))
                }
            }
        }
    }
}

pub(super) fn value_to_document(value: Value) -> aws_smithy_types::Document {
    use aws_smithy_types::{Document, Number};

    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(b),
        Value::Number(number) => {
            if let Some(u) = number.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = number.as_i64() {
                Document::Number(Number::NegInt(i))
            } else if let Some(f) = number.as_f64() {
                Document::Number(Number::Float(f))
            } else {
                Document::Null
            }
        }
        Value::String(s) => Document::String(s),
        Value::Array(items) => Document::Array(items.into_iter().map(value_to_document).collect()),
        Value::Object(map) => {
            Document::Object(map.into_iter().map(|(k, v)| (k, value_to_document(v))).collect())
        }
    }
}

/// Bedrock expects tool input to be an object; coerce other shapes.
fn normalize_tool_input(doc: aws_smithy_types::Document) -> aws_smithy_types::Document {
    use aws_smithy_types::Document;

    match doc {
        Document::Object(_) | Document::String(_) => doc,
        Document::Null => Document::Object(std::collections::HashMap::new()),
        other => Document::String(super::output::document_to_string(&other)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use crate::messages::canonical::{FunctionCall, ProviderId, ToolCallKind};
    use aws_smithy_types::Document;

    fn tool_call(arguments: &str) -> ToolCall {
        ToolCall {
            id: "tool-1".to_string(),
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: "Bash".to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn tool_use_arguments_parse_as_object() {
        let block = tool_call_to_block(tool_call(r#"{"command":"ls"}"#)).expect("content block");

        let ContentBlock::ToolUse(tool_use) = block else {
            panic!("expected tool use block");
        };

        assert!(matches!(tool_use.input(), Document::Object(_)));
    }

    #[test]
    fn tool_use_arguments_fall_back_to_string() {
        let raw = r#"{"command": "echo "hello""}"#;
        let block = tool_call_to_block(tool_call(raw)).expect("content block");

        let ContentBlock::ToolUse(tool_use) = block else {
            panic!("expected tool use block");
        };

        assert!(matches!(tool_use.input(), Document::String(s) if s == raw));
    }

    #[test]
    fn consecutive_same_role_messages_are_grouped() {
        let request = ChatRequest {
            provider: ProviderId::Bedrock,
            model: "anthropic.claude-3-5-haiku-20241022-v1:0".into(),
            messages: vec![
                ChatMessage::text(ChatRole::System, "Be terse."),
                ChatMessage::text(ChatRole::User, "first"),
                ChatMessage::text(ChatRole::User, "second"),
                ChatMessage::text(ChatRole::Assistant, "reply"),
            ],
            params: None,
            fallbacks: None,
            raw_body: None,
        };

        let (system, messages) = convert_messages(request.messages);

        assert_eq!(system.unwrap().len(), 1);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content().len(), 2);
        assert_eq!(*messages[0].role(), ConversationRole::User);
        assert_eq!(*messages[1].role(), ConversationRole::Assistant);
    }

    #[test]
    fn region_prefixed_model_ids_resolve_family() {
        assert!(matches!(
            ModelFamily::from_model_id("us.anthropic.claude-3-5-haiku-20241022-v1:0"),
            ModelFamily::Anthropic
        ));
        assert!(matches!(
            ModelFamily::from_model_id("amazon.titan-text-express-v1"),
            ModelFamily::AmazonTitan
        ));
    }
}
