//! AWS Bedrock driver using the unified Converse API.
//!
//! The Converse API fronts every Bedrock model family (Anthropic, Amazon,
//! Meta, Mistral, Cohere) with one interface; authentication is SigV4
//! through the AWS SDK rather than an API key header.

mod input;
mod output;

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_bedrockruntime::{
    Client as BedrockRuntimeClient,
    error::ProvideErrorMetadata,
    operation::{converse::ConverseInput, converse_stream::ConverseStreamInput},
    types::ConverseStreamOutput,
};
use aws_smithy_runtime_api::client::result::SdkError;
use config::BedrockProviderConfig;
use secrecy::ExposeSecret;

use crate::error::{GatewayError, Result};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, ChatStreamChunk, FinishReason, MessageDelta, ProviderId, StreamChoice, Usage,
};
use crate::provider::{Provider, ProviderStream};
use crate::request::RequestContext;

pub struct BedrockProvider {
    client: BedrockRuntimeClient,
    config: BedrockProviderConfig,
}

impl BedrockProvider {
    pub async fn new(config: BedrockProviderConfig) -> Result<Self> {
        let sdk_config = load_aws_config(&config).await;
        let client = BedrockRuntimeClient::new(&sdk_config);

        Ok(Self { client, config })
    }
}

async fn load_aws_config(config: &BedrockProviderConfig) -> aws_config::SdkConfig {
    let region = Region::new(config.region.clone());
    let mut loader = aws_config::from_env().region(region);

    if let (Some(access_key), Some(secret_key)) = (&config.access_key_id, &config.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key.expose_secret(),
            secret_key.expose_secret(),
            config.session_token.as_ref().map(|t| t.expose_secret().to_string()),
            None,
            "bedrock_provider",
        ));
    }

    if let Some(profile) = &config.profile {
        loader = loader.profile_name(profile);
    }

    let mut sdk_config = loader.load().await;

    if let Some(base_url) = &config.base_url {
        log::debug!("Using custom Bedrock endpoint: {base_url}");
        sdk_config = sdk_config.into_builder().endpoint_url(base_url).build();
    }

    sdk_config
}

fn sdk_error_to_gateway<E, R>(error: SdkError<E, R>) -> GatewayError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::ServiceError(service_error) => {
            let err = service_error.err();
            let message = err.message().unwrap_or("Unknown error").to_string();
            let code = err.code().map(str::to_string);

            let status = match code.as_deref() {
                Some("AccessDeniedException") => 403,
                Some("ResourceNotFoundException") => 404,
                Some("ThrottlingException") => 429,
                Some("ValidationException") => 400,
                Some("ModelTimeoutException") => 504,
                Some("ServiceUnavailableException") => 503,
                _ => 500,
            };

            GatewayError::ProviderApi {
                provider: ProviderId::Bedrock,
                status,
                error_type: code,
                message,
                param: None,
            }
        }
        _ => GatewayError::ProviderRequestFailed {
            provider: ProviderId::Bedrock,
            message: format!("{error:?}"),
        },
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Bedrock
    }

    async fn chat(&self, request: ChatRequest, _ctx: &RequestContext) -> Result<ChatResponse> {
        log::debug!("Bedrock chat completion for model {}", request.model);

        let original_model = request.model.clone();
        let converse_input = ConverseInput::from(request);

        let output = self
            .client
            .converse()
            .set_model_id(converse_input.model_id)
            .set_messages(converse_input.messages)
            .set_system(converse_input.system)
            .set_inference_config(converse_input.inference_config)
            .set_tool_config(converse_input.tool_config)
            .send()
            .await
            .map_err(|e| {
                log::error!("Converse invocation failed: {e:?}");
                sdk_error_to_gateway(e)
            })?;

        let mut response = ChatResponse::from(output);
        response.model = original_model;

        Ok(response)
    }

    async fn chat_stream(&self, request: ChatRequest, _ctx: &RequestContext) -> Result<ProviderStream> {
        log::debug!("Bedrock streaming for model {}", request.model);

        let original_model = request.model.clone();
        let converse_input = ConverseStreamInput::from(request);

        let stream_output = self
            .client
            .converse_stream()
            .set_model_id(converse_input.model_id)
            .set_messages(converse_input.messages)
            .set_system(converse_input.system)
            .set_inference_config(converse_input.inference_config)
            .set_tool_config(converse_input.tool_config)
            .send()
            .await
            .map_err(|e| {
                log::error!("ConverseStream invocation failed: {e:?}");
                sdk_error_to_gateway(e)
            })?;

        // Converse emits `messageStop` before the usage-bearing `metadata`
        // event, so the stop reason is held back and attached to the final
        // usage chunk.
        struct StreamState {
            receiver: aws_sdk_bedrockruntime::primitives::event_stream::EventReceiver<
                ConverseStreamOutput,
                aws_sdk_bedrockruntime::types::error::ConverseStreamOutputError,
            >,
            model: String,
            pending_finish: Option<FinishReason>,
            done: bool,
        }

        let state = StreamState {
            receiver: stream_output.stream,
            model: original_model,
            pending_finish: None,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                match state.receiver.recv().await {
                    Ok(Some(ConverseStreamOutput::MessageStop(stop))) => {
                        state.pending_finish = Some(match &stop.stop_reason {
                            aws_sdk_bedrockruntime::types::StopReason::EndTurn
                            | aws_sdk_bedrockruntime::types::StopReason::StopSequence => FinishReason::Stop,
                            aws_sdk_bedrockruntime::types::StopReason::MaxTokens => FinishReason::Length,
                            aws_sdk_bedrockruntime::types::StopReason::ToolUse => FinishReason::ToolCalls,
                            aws_sdk_bedrockruntime::types::StopReason::ContentFiltered
                            | aws_sdk_bedrockruntime::types::StopReason::GuardrailIntervened => {
                                FinishReason::ContentFilter
                            }
                            other => FinishReason::Other(other.as_str().to_string()),
                        });
                    }
                    Ok(Some(event)) => {
                        if let Ok(mut chunk) = ChatStreamChunk::try_from(event) {
                            chunk.model = state.model.clone();

                            // Attach the held-back stop reason to the usage
                            // chunk that follows messageStop.
                            if chunk.usage.is_some()
                                && let Some(finish) = state.pending_finish.take()
                            {
                                if chunk.choices.is_empty() {
                                    chunk.choices.push(StreamChoice {
                                        index: 0,
                                        delta: MessageDelta::default(),
                                        finish_reason: Some(finish),
                                    });
                                } else {
                                    chunk.choices[0].finish_reason = Some(finish);
                                }
                                state.done = true;
                            }

                            return Some((Ok(chunk), state));
                        }
                    }
                    Ok(None) => {
                        // Stream ended; flush the stop reason if the metadata
                        // event never arrived.
                        if let Some(finish) = state.pending_finish.take() {
                            state.done = true;
                            let chunk = ChatStreamChunk {
                                id: format!("bedrock-{}", uuid::Uuid::new_v4()),
                                model: state.model.clone(),
                                provider: ProviderId::Bedrock,
                                choices: vec![StreamChoice {
                                    index: 0,
                                    delta: MessageDelta::default(),
                                    finish_reason: Some(finish),
                                }],
                                usage: None::<Usage>,
                                chunk_index: 0,
                            };
                            return Some((Ok(chunk), state));
                        }
                        return None;
                    }
                    Err(e) => {
                        log::error!("Bedrock stream error: {e:?}");
                        state.done = true;
                        return Some((
                            Err(GatewayError::StreamTerminal {
                                provider: ProviderId::Bedrock,
                                error_type: e.code().map(str::to_string),
                                message: e.message().unwrap_or("stream error").to_string(),
                            }),
                            state,
                        ));
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
