//! The RFC 6146 section 3.5.2 TCP session state machine.
//!
//! Timeout transitions are not events here; the session table applies
//! them directly when it sweeps, because the successor state of a timeout
//! is always "gone".

use crate::types::SessionState;

/// What a TCP segment means to the state machine. `Data` is any segment
/// carrying none of the interesting flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpEvent {
    SynV4,
    SynV6,
    FinV4,
    FinV6,
    Rst,
    Data,
}

/// Advance a TCP session. Duplicate events leave the state unchanged, so
/// retransmissions and same-direction reordering are harmless.
pub fn tcp_transition(state: SessionState, event: TcpEvent) -> SessionState {
    use SessionState::*;
    use TcpEvent::*;

    match (state, event) {
        (V6Init, SynV4) => Established,
        (V6Init, _) => V6Init,

        (V4Init, SynV6) => Established,
        (V4Init, _) => V4Init,

        (Established, FinV4) => V4FinRcv,
        (Established, FinV6) => V6FinRcv,
        (Established, Rst) => Trans,
        (Established, _) => Established,

        (V4FinRcv, FinV6) => V4FinV6FinRcv,
        (V4FinRcv, _) => V4FinRcv,

        (V6FinRcv, FinV4) => V4FinV6FinRcv,
        (V6FinRcv, _) => V6FinRcv,

        (V4FinV6FinRcv, _) => V4FinV6FinRcv,

        // Traffic on a reset connection that was not actually torn down
        // revives it.
        (Trans, Rst) => Trans,
        (Trans, _) => Established,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;
    use TcpEvent::*;

    #[test]
    fn test_three_way_handshake_v6_first() {
        let s = V6Init;
        let s = tcp_transition(s, SynV6); // retransmitted SYN
        assert_eq!(s, V6Init);
        let s = tcp_transition(s, SynV4);
        assert_eq!(s, Established);
    }

    #[test]
    fn test_three_way_handshake_v4_first() {
        assert_eq!(tcp_transition(V4Init, SynV6), Established);
        assert_eq!(tcp_transition(V4Init, SynV4), V4Init);
    }

    #[test]
    fn test_close_both_directions() {
        let s = tcp_transition(Established, FinV4);
        assert_eq!(s, V4FinRcv);
        let s = tcp_transition(s, FinV6);
        assert_eq!(s, V4FinV6FinRcv);

        let s = tcp_transition(Established, FinV6);
        assert_eq!(s, V6FinRcv);
        let s = tcp_transition(s, FinV4);
        assert_eq!(s, V4FinV6FinRcv);
    }

    #[test]
    fn test_fin_states_tolerate_data() {
        assert_eq!(tcp_transition(V4FinRcv, Data), V4FinRcv);
        assert_eq!(tcp_transition(V6FinRcv, SynV4), V6FinRcv);
        assert_eq!(tcp_transition(V4FinV6FinRcv, Data), V4FinV6FinRcv);
    }

    #[test]
    fn test_rst_and_revival() {
        let s = tcp_transition(Established, Rst);
        assert_eq!(s, Trans);
        assert_eq!(tcp_transition(s, Data), Established);
        assert_eq!(tcp_transition(s, Rst), Trans);
    }
}
