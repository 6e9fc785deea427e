//! Event catalogue and the encryption/routing decision table.
//!
//! Every known event name maps to exactly one `Encryption` and one `Route`
//! through an exhaustive match, so adding a variant forces a decision.
//! Names outside the catalogue are sealed and routed as broadcasts.

use std::fmt;

/// Whether payloads on an event pass through the envelope codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// Bootstrap/liveness traffic that must work before any key exists.
    Plaintext,
    /// Sealed under the negotiated session key in both directions.
    Sealed,
}

/// Where an inbound frame is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Reply to a command; delivered to the correlator.
    Reply,
    /// State push; delivered to the event sink.
    Broadcast,
    /// Link liveness; refreshes the watchdog and goes nowhere else.
    Liveness,
    /// Transport lifecycle; handled by the link itself.
    Lifecycle,
}

/// Known event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    // -- Transport lifecycle --
    Hello,
    Connect,
    Disconnect,
    ConnectError,
    ConnectTimeout,
    Error,
    ReconnectAttempt,

    // -- Liveness --
    SetLastSeenApp,

    // -- Commands (replies arrive on the same name) --
    AcceptRequest,
    GenerateNewHandshakeNode,
    Logout,
    Register,
    SetAvatar,
    SetDisplayName,
    SendHandshakeRequest,
    SendHandshakeRequestWithInitialMsg,
    SendMessage,
    SendPayment,
    SetBio,
    DisconnectContact,

    // -- Broadcast snapshots --
    OnChats,
    OnSentRequests,
    OnReceivedRequests,
    OnAvatar,
    OnDisplayName,
    OnHandshakeAddress,
    OnBio,
}

impl EventName {
    pub const ALL: [EventName; 27] = [
        EventName::Hello,
        EventName::Connect,
        EventName::Disconnect,
        EventName::ConnectError,
        EventName::ConnectTimeout,
        EventName::Error,
        EventName::ReconnectAttempt,
        EventName::SetLastSeenApp,
        EventName::AcceptRequest,
        EventName::GenerateNewHandshakeNode,
        EventName::Logout,
        EventName::Register,
        EventName::SetAvatar,
        EventName::SetDisplayName,
        EventName::SendHandshakeRequest,
        EventName::SendHandshakeRequestWithInitialMsg,
        EventName::SendMessage,
        EventName::SendPayment,
        EventName::SetBio,
        EventName::DisconnectContact,
        EventName::OnChats,
        EventName::OnSentRequests,
        EventName::OnReceivedRequests,
        EventName::OnAvatar,
        EventName::OnDisplayName,
        EventName::OnHandshakeAddress,
        EventName::OnBio,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Hello => "hello",
            EventName::Connect => "connect",
            EventName::Disconnect => "disconnect",
            EventName::ConnectError => "connect_error",
            EventName::ConnectTimeout => "connect_timeout",
            EventName::Error => "error",
            EventName::ReconnectAttempt => "reconnect_attempt",
            EventName::SetLastSeenApp => "SET_LAST_SEEN_APP",
            EventName::AcceptRequest => "ACCEPT_REQUEST",
            EventName::GenerateNewHandshakeNode => "GENERATE_NEW_HANDSHAKE_NODE",
            EventName::Logout => "LOGOUT",
            EventName::Register => "REGISTER",
            EventName::SetAvatar => "SET_AVATAR",
            EventName::SetDisplayName => "SET_DISPLAY_NAME",
            EventName::SendHandshakeRequest => "SEND_HANDSHAKE_REQUEST",
            EventName::SendHandshakeRequestWithInitialMsg => {
                "SEND_HANDSHAKE_REQUEST_WITH_INITIAL_MSG"
            }
            EventName::SendMessage => "SEND_MESSAGE",
            EventName::SendPayment => "SEND_PAYMENT",
            EventName::SetBio => "SET_BIO",
            EventName::DisconnectContact => "DISCONNECT",
            EventName::OnChats => "ON_CHATS",
            EventName::OnSentRequests => "ON_SENT_REQUESTS",
            EventName::OnReceivedRequests => "ON_RECEIVED_REQUESTS",
            EventName::OnAvatar => "ON_AVATAR",
            EventName::OnDisplayName => "ON_DISPLAY_NAME",
            EventName::OnHandshakeAddress => "ON_HANDSHAKE_ADDRESS",
            EventName::OnBio => "ON_BIO",
        }
    }

    /// Look up a wire name.
    pub fn parse(name: &str) -> Option<EventName> {
        EventName::ALL.iter().copied().find(|e| e.as_str() == name)
    }

    pub fn encryption(&self) -> Encryption {
        match self {
            EventName::Hello
            | EventName::Connect
            | EventName::Disconnect
            | EventName::ConnectError
            | EventName::ConnectTimeout
            | EventName::Error
            | EventName::ReconnectAttempt
            | EventName::SetLastSeenApp => Encryption::Plaintext,

            EventName::AcceptRequest
            | EventName::GenerateNewHandshakeNode
            | EventName::Logout
            | EventName::Register
            | EventName::SetAvatar
            | EventName::SetDisplayName
            | EventName::SendHandshakeRequest
            | EventName::SendHandshakeRequestWithInitialMsg
            | EventName::SendMessage
            | EventName::SendPayment
            | EventName::SetBio
            | EventName::DisconnectContact
            | EventName::OnChats
            | EventName::OnSentRequests
            | EventName::OnReceivedRequests
            | EventName::OnAvatar
            | EventName::OnDisplayName
            | EventName::OnHandshakeAddress
            | EventName::OnBio => Encryption::Sealed,
        }
    }

    pub fn route(&self) -> Route {
        match self {
            EventName::Hello
            | EventName::Connect
            | EventName::Disconnect
            | EventName::ConnectError
            | EventName::ConnectTimeout
            | EventName::Error
            | EventName::ReconnectAttempt => Route::Lifecycle,

            EventName::SetLastSeenApp => Route::Liveness,

            EventName::AcceptRequest
            | EventName::GenerateNewHandshakeNode
            | EventName::Logout
            | EventName::Register
            | EventName::SetAvatar
            | EventName::SetDisplayName
            | EventName::SendHandshakeRequest
            | EventName::SendHandshakeRequestWithInitialMsg
            | EventName::SendMessage
            | EventName::SendPayment
            | EventName::SetBio
            | EventName::DisconnectContact => Route::Reply,

            EventName::OnChats
            | EventName::OnSentRequests
            | EventName::OnReceivedRequests
            | EventName::OnAvatar
            | EventName::OnDisplayName
            | EventName::OnHandshakeAddress
            | EventName::OnBio => Route::Broadcast,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encryption for any wire name. Unknown names are sealed.
pub fn encryption_for(name: &str) -> Encryption {
    EventName::parse(name)
        .map(|e| e.encryption())
        .unwrap_or(Encryption::Sealed)
}

/// Route for any wire name. Unknown names are broadcasts.
pub fn route_for(name: &str) -> Route {
    EventName::parse(name)
        .map(|e| e.route())
        .unwrap_or(Route::Broadcast)
}
