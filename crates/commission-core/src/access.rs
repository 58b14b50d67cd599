//! Per-attribute access gate
//!
//! Every characteristic/descriptor operation passes through here before it
//! reaches application logic. The gate is a static table from (attribute,
//! operation) to a policy of allow, deny with a wire reason, or dispatch to
//! a handler. It also owns the per-channel subscription flags.

use tracing::warn;

use crate::command::{CommandError, CredentialCommand};
use crate::types::ChannelId;

// ----------------------------------------------------------------------------
// Attribute Addressing
// ----------------------------------------------------------------------------

/// Attribute targeted by a peer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeId {
    Characteristic(ChannelId),
    SubscriptionDescriptor(ChannelId),
    /// An identity outside the service table, kept for anomaly logging
    Unknown(u16),
}

/// Operation kind as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    ReadCharacteristic,
    WriteCharacteristic,
    ReadDescriptor,
    WriteDescriptor,
}

// ----------------------------------------------------------------------------
// Policies and Verdicts
// ----------------------------------------------------------------------------

/// Wire-level denial reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    ReadNotPermitted,
    WriteNotPermitted,
    NotSupported,
    NotFound,
    InvalidLength,
}

impl DenyReason {
    /// Attribute-protocol error code for this reason
    pub fn att_code(&self) -> u8 {
        match self {
            DenyReason::ReadNotPermitted => 0x02,
            DenyReason::WriteNotPermitted => 0x03,
            DenyReason::NotSupported => 0x06,
            DenyReason::NotFound => 0x0A,
            DenyReason::InvalidLength => 0x0D,
        }
    }
}

/// Handler targets for dispatched operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    SubscriptionWrite,
    SubscriptionRead,
    CredentialWrite,
}

/// Entry in the access table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessPolicy {
    Deny(DenyReason),
    Dispatch(Handler),
}

/// The static access table
fn policy_for(attribute: AttributeId, op: AccessOp) -> AccessPolicy {
    use AccessOp::*;
    use AccessPolicy::*;
    use AttributeId::*;

    match (attribute, op) {
        // Notify-only channels reject both value reads and writes
        (Characteristic(ChannelId::ScanResult | ChannelId::Status), ReadCharacteristic) => {
            Deny(DenyReason::ReadNotPermitted)
        }
        (Characteristic(ChannelId::ScanResult | ChannelId::Status), WriteCharacteristic) => {
            Deny(DenyReason::WriteNotPermitted)
        }

        // Write-only credential channel
        (Characteristic(ChannelId::CredentialSubmit), WriteCharacteristic) => {
            Dispatch(Handler::CredentialWrite)
        }
        (Characteristic(ChannelId::CredentialSubmit), ReadCharacteristic) => {
            Deny(DenyReason::ReadNotPermitted)
        }

        // Subscription descriptors exist only on notify channels
        (SubscriptionDescriptor(ch), WriteDescriptor) if ch.is_notify() => {
            Dispatch(Handler::SubscriptionWrite)
        }
        (SubscriptionDescriptor(ch), ReadDescriptor) if ch.is_notify() => {
            Dispatch(Handler::SubscriptionRead)
        }
        (SubscriptionDescriptor(_), _) => Deny(DenyReason::NotFound),

        (Unknown(_), _) => Deny(DenyReason::NotFound),

        _ => Deny(DenyReason::NotSupported),
    }
}

/// Outcome of gating one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Operation allowed; `response` carries read data when applicable
    Accepted { response: Option<Vec<u8>> },
    /// Operation rejected at the wire level
    Denied(DenyReason),
    /// A subscription flag changed
    Subscribed { channel: ChannelId, enabled: bool },
    /// A well-formed command arrived on the credential channel
    Command(CredentialCommand),
    /// The credential write was accepted at the wire level but does not parse
    BadCommand(CommandError),
}

// ----------------------------------------------------------------------------
// Subscription State
// ----------------------------------------------------------------------------

/// Peer-side opt-in flags for the notify channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscriptions {
    pub scan_result: bool,
    pub status: bool,
}

impl Subscriptions {
    pub fn get(&self, channel: ChannelId) -> bool {
        match channel {
            ChannelId::ScanResult => self.scan_result,
            ChannelId::Status => self.status,
            ChannelId::CredentialSubmit => false,
        }
    }

    fn set(&mut self, channel: ChannelId, enabled: bool) {
        match channel {
            ChannelId::ScanResult => self.scan_result = enabled,
            ChannelId::Status => self.status = enabled,
            ChannelId::CredentialSubmit => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Access Gate
// ----------------------------------------------------------------------------

/// Authorizes attribute operations and tracks subscriptions
#[derive(Debug)]
pub struct AccessGate {
    subscriptions: Subscriptions,
    max_credential_len: usize,
}

impl AccessGate {
    pub fn new(max_credential_len: usize) -> Self {
        Self {
            subscriptions: Subscriptions::default(),
            max_credential_len,
        }
    }

    pub fn subscriptions(&self) -> Subscriptions {
        self.subscriptions
    }

    /// Apply a subscription change reported directly by the transport
    /// (equivalent to a descriptor write it performed on our behalf)
    pub fn set_subscription(&mut self, channel: ChannelId, enabled: bool) {
        self.subscriptions.set(channel, enabled);
    }

    /// Drop all subscription flags (link lost)
    pub fn reset_subscriptions(&mut self) {
        self.subscriptions = Subscriptions::default();
    }

    /// Gate one attribute operation
    pub fn process(&mut self, attribute: AttributeId, op: AccessOp, payload: &[u8]) -> GateVerdict {
        let handler = match policy_for(attribute, op) {
            AccessPolicy::Deny(reason) => {
                if let AttributeId::Unknown(uuid) = attribute {
                    warn!(uuid, ?op, "access to unknown attribute");
                }
                return GateVerdict::Denied(reason);
            }
            AccessPolicy::Dispatch(handler) => handler,
        };

        match handler {
            Handler::SubscriptionWrite => {
                let AttributeId::SubscriptionDescriptor(channel) = attribute else {
                    return GateVerdict::Denied(DenyReason::NotSupported);
                };
                if payload.len() < 2 {
                    return GateVerdict::Denied(DenyReason::InvalidLength);
                }
                let value = u16::from_le_bytes([payload[0], payload[1]]);
                let enabled = value & 0x0001 != 0;
                self.subscriptions.set(channel, enabled);
                GateVerdict::Subscribed { channel, enabled }
            }
            Handler::SubscriptionRead => {
                let AttributeId::SubscriptionDescriptor(channel) = attribute else {
                    return GateVerdict::Denied(DenyReason::NotSupported);
                };
                let value = u16::from(self.subscriptions.get(channel)).to_le_bytes();
                GateVerdict::Accepted {
                    response: Some(value.to_vec()),
                }
            }
            Handler::CredentialWrite => {
                if payload.len() > self.max_credential_len {
                    return GateVerdict::Denied(DenyReason::InvalidLength);
                }
                match CredentialCommand::parse(payload) {
                    Ok(command) => GateVerdict::Command(command),
                    Err(err) => GateVerdict::BadCommand(err),
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
