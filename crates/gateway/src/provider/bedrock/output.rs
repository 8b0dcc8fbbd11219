//! Response conversion for the AWS Bedrock Converse API.

use aws_sdk_bedrockruntime::{
    operation::converse::ConverseOutput,
    types::{self, ContentBlock, ContentBlockDelta, ConverseStreamOutput, StopReason, ToolResultContentBlock},
};
use serde_json::Value;

use crate::messages::canonical::{
    ChatChoice, ChatMessage, ChatResponse, ChatRole, ChatStreamChunk, ContentBlock as CanonicalBlock, FinishReason,
    FunctionCall, FunctionDelta, FunctionStart, MessageContent, MessageDelta, ProviderId, StreamChoice, ToolCall,
    ToolCallDelta, ToolCallKind, Usage,
};

pub(super) fn document_to_value(doc: &aws_smithy_types::Document) -> Value {
    use aws_smithy_types::{Document, Number};
    use serde_json::Number as JsonNumber;

    match doc {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(number) => match number {
            Number::PosInt(u) => Value::Number(JsonNumber::from(*u)),
            Number::NegInt(i) => Value::Number(JsonNumber::from(*i)),
            Number::Float(f) => JsonNumber::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        },
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(document_to_value).collect()),
        Document::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), document_to_value(v))).collect())
        }
    }
}

pub(super) fn document_to_string(doc: &aws_smithy_types::Document) -> String {
    serde_json::to_string(&document_to_value(doc)).unwrap_or_else(|_| "{}".to_string())
}

fn stop_reason_to_finish(reason: &StopReason) -> FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::ContentFiltered | StopReason::GuardrailIntervened => FinishReason::ContentFilter,
        other => {
            log::warn!("Unknown Bedrock stop reason: {other:?}");
            FinishReason::Other(other.as_str().to_string())
        }
    }
}

fn tool_result_to_text(block: &types::ToolResultBlock) -> String {
    let mut pieces = Vec::new();

    for item in block.content() {
        match item {
            ToolResultContentBlock::Text(text) => pieces.push(text.clone()),
            ToolResultContentBlock::Json(doc) => pieces.push(document_to_string(doc)),
            other => {
                log::debug!("Ignoring non-text tool result content: {other:?}");
            }
        }
    }

    pieces.join("")
}

impl From<ConverseOutput> for ChatResponse {
    fn from(output: ConverseOutput) -> Self {
        let message = match output.output {
            Some(types::ConverseOutput::Message(message)) => message,
            other => {
                log::debug!("Missing or unexpected output in Converse response: {other:?}");
                types::Message::builder()
                    .build()
                    .expect("empty Bedrock message builds")
            }
        };

        let mut blocks: Vec<CanonicalBlock> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut thought: Option<String> = None;

        for block in message.content() {
            match block {
                ContentBlock::Text(text) => blocks.push(CanonicalBlock::Text { text: text.clone() }),
                ContentBlock::ToolUse(tool_use) => {
                    let input = document_to_value(&tool_use.input);
                    tool_calls.push(ToolCall {
                        id: tool_use.tool_use_id.clone(),
                        kind: ToolCallKind::Function,
                        function: FunctionCall {
                            name: tool_use.name.clone(),
                            arguments: FunctionCall::arguments_from_value(&input),
                        },
                    });
                }
                ContentBlock::ToolResult(result) => {
                    blocks.push(CanonicalBlock::Text {
                        text: tool_result_to_text(result),
                    });
                }
                ContentBlock::ReasoningContent(reasoning) => {
                    if let types::ReasoningContentBlock::ReasoningText(text_block) = reasoning {
                        match &mut thought {
                            Some(existing) => existing.push_str(text_block.text()),
                            None => thought = Some(text_block.text().to_string()),
                        }
                    }
                }
                other => {
                    log::warn!("Unexpected content block in Converse response: {other:?}");
                }
            }
        }

        let content = match blocks.len() {
            0 => None,
            1 => blocks.pop().map(|block| match block {
                CanonicalBlock::Text { text } => MessageContent::Text(text),
                other => MessageContent::Blocks(vec![other]),
            }),
            _ => Some(MessageContent::Blocks(blocks)),
        };

        let chat_message = ChatMessage {
            role: ChatRole::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            thought,
            tool_call_id: None,
        };

        let usage = output.usage.map(|usage| {
            Usage {
                prompt_tokens: usage.input_tokens as u32,
                completion_tokens: usage.output_tokens as u32,
                total_tokens: usage.total_tokens as u32,
                prompt_details: None,
                completion_details: None,
            }
            .fill_total()
        });

        Self {
            id: format!("bedrock-{}", uuid::Uuid::new_v4()),
            model: String::new(),
            provider: ProviderId::Bedrock,
            choices: vec![ChatChoice {
                index: 0,
                message: chat_message,
                finish_reason: Some(stop_reason_to_finish(&output.stop_reason)),
            }],
            usage,
            created: crate::messages::canonical::now_unix(),
            extras: Default::default(),
        }
    }
}

/// Stream events that produce no canonical chunk convert to `Err(())`.
impl TryFrom<ConverseStreamOutput> for ChatStreamChunk {
    type Error = ();

    fn try_from(event: ConverseStreamOutput) -> Result<Self, Self::Error> {
        let chunk = |delta: MessageDelta, finish: Option<FinishReason>, usage: Option<Usage>| ChatStreamChunk {
            id: format!("bedrock-{}", uuid::Uuid::new_v4()),
            model: String::new(),
            provider: ProviderId::Bedrock,
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage,
            chunk_index: 0,
        };

        match event {
            ConverseStreamOutput::MessageStart(_) => Ok(chunk(
                MessageDelta {
                    role: Some(ChatRole::Assistant),
                    ..Default::default()
                },
                None,
                None,
            )),

            ConverseStreamOutput::ContentBlockStart(start) => match start.start() {
                Some(types::ContentBlockStart::ToolUse(tool_use)) => Ok(chunk(
                    MessageDelta {
                        tool_calls: Some(vec![ToolCallDelta::Start {
                            index: start.content_block_index() as usize,
                            id: tool_use.tool_use_id().to_string(),
                            function: FunctionStart {
                                name: tool_use.name().to_string(),
                                arguments: String::new(),
                            },
                        }]),
                        ..Default::default()
                    },
                    None,
                    None,
                )),
                _ => Err(()),
            },

            ConverseStreamOutput::ContentBlockDelta(block_delta) => {
                let index = block_delta.content_block_index() as usize;

                match block_delta.delta() {
                    Some(ContentBlockDelta::Text(text)) => Ok(chunk(
                        MessageDelta {
                            content: Some(text.to_string()),
                            ..Default::default()
                        },
                        None,
                        None,
                    )),
                    Some(ContentBlockDelta::ToolUse(tool_delta)) => Ok(chunk(
                        MessageDelta {
                            tool_calls: Some(vec![ToolCallDelta::Delta {
                                index,
                                function: FunctionDelta {
                                    arguments: tool_delta.input().to_string(),
                                },
                            }]),
                            ..Default::default()
                        },
                        None,
                        None,
                    )),
                    Some(ContentBlockDelta::ReasoningContent(reasoning)) => match reasoning {
                        types::ReasoningContentBlockDelta::Text(text) => Ok(chunk(
                            MessageDelta {
                                thought: Some(text.clone()),
                                ..Default::default()
                            },
                            None,
                            None,
                        )),
                        _ => Err(()),
                    },
                    _ => Err(()),
                }
            }

            ConverseStreamOutput::ContentBlockStop(_) => Err(()),

            ConverseStreamOutput::MessageStop(stop) => Ok(chunk(
                MessageDelta::default(),
                Some(stop_reason_to_finish(&stop.stop_reason)),
                None,
            )),

            ConverseStreamOutput::Metadata(metadata) => {
                let Some(usage) = metadata.usage else {
                    return Err(());
                };

                Ok(ChatStreamChunk {
                    id: format!("bedrock-{}", uuid::Uuid::new_v4()),
                    model: String::new(),
                    provider: ProviderId::Bedrock,
                    choices: vec![],
                    usage: Some(
                        Usage {
                            prompt_tokens: usage.input_tokens as u32,
                            completion_tokens: usage.output_tokens as u32,
                            total_tokens: usage.total_tokens as u32,
                            prompt_details: None,
                            completion_details: None,
                        }
                        .fill_total(),
                    ),
                    chunk_index: 0,
                })
            }

            other => {
                log::warn!("Unknown Bedrock stream event: {other:?}");
                Err(())
            }
        }
    }
}
