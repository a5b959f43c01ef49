//! Application layer for Conclave
//!
//! Defines the ports the orchestrator consumes (store, LLM gateway, event
//! publisher, transcript logger) and the use cases that drive a meeting from
//! Draft to a terminal state.

pub mod ports;
pub mod use_cases;

pub use ports::event_publisher::{EventPublisher, NoopEventPublisher};
pub use ports::llm_gateway::{
    ChatMessage, ChatRole, Completion, GatewayError, GenerateRequest, LlmGateway, ResponseFormat,
    MOCK_MODEL, MOCK_PROVIDER_ID,
};
pub use ports::store::{MeetingLock, MeetingStore, StoreError, StoreResult};
pub use ports::transcript::{NoopTranscriptLogger, TranscriptEvent, TranscriptLogger};
pub use use_cases::create_meeting::{CreateMeetingError, CreateMeetingUseCase};
pub use use_cases::facilitator::FacilitatorService;
pub use use_cases::run_meeting::{MeetingRunner, RunMeetingError};
