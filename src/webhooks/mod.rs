//! Outbound webhooks.
//!
//! This module provides:
//! - Domain events and the channel business logic writes them to
//! - Translation of events into subscriber payloads
//! - Per-repository delivery with HMAC-SHA256 signatures

pub mod delivery;
pub mod events;
pub mod notifier;
pub mod payload;
pub mod signature;
pub mod translator;

pub use delivery::{
    DELIVERY_HEADER, Delivery, DeliveryError, EVENT_HEADER, HookEndpoint, HookQueue,
    HookRegistry, HookSender, HookTask, HttpHookSender,
};
pub use events::{DomainEvent, Subject};
pub use notifier::{Notifier, NotifierWorker};
pub use payload::{HookAction, HookEventType};
pub use signature::{
    SIGNATURE_HEADER, compute_signature, format_signature_header, parse_signature_header,
    sign_payload, verify_signature,
};
pub use translator::{AccessResolver, TranslateError, Translator};
