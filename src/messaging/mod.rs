/// Message Delivery System
///
/// Store-and-forward tracking for chat messages relayed through the push
/// gateway: durable acceptance, monotonic status progression driven by
/// receiver receipts, pull-based catch-up for offline receivers, and
/// TTL-bounded retention.
pub mod tracker;

pub use tracker::{
    DeliveryStatus, DeliveryTracker, MessageDelivery, ReceiptOutcome, SendMessageInput,
    SendOutcome,
};
