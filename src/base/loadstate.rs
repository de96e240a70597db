/// Progress of a transport session through one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// No connection bound yet.
    #[default]
    Idle,

    /// Waiting for a pool permit.
    WaitingForAvailableConnection,

    /// Opening the TCP connection and negotiating the protocol.
    Connecting,

    /// Sending the request head and body.
    SendingRequest,

    /// Waiting for the response head.
    WaitingForResponse,

    /// The session released its connection.
    Closed,
}
